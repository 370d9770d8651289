//! Environment loading helpers.
//!
//! Keeps the fallback chains in one place so call sites never repeat
//! `or_else` ladders.

use std::env;

/// Deprecated key → recommended key.
const DEPRECATED_PAIRS: &[(&str, &str)] = &[
    ("BRIDGE_TIMEOUT_SECS", "CODEBRIDGE_TIMEOUT_SECS"),
    ("BRIDGE_MAX_MEMORY_MB", "CODEBRIDGE_MAX_MEMORY_MB"),
    ("BRIDGE_CPU_SECS", "CODEBRIDGE_CPU_SECS"),
    ("BRIDGE_SKILLS_ROOT", "CODEBRIDGE_SKILLS_ROOT"),
    ("BRIDGE_QUIET", "CODEBRIDGE_QUIET"),
    ("BRIDGE_LOG_LEVEL", "CODEBRIDGE_LOG_LEVEL"),
    ("BRIDGE_LOG_JSON", "CODEBRIDGE_LOG_JSON"),
    ("BRIDGE_AUDIT_LOG", "CODEBRIDGE_AUDIT_LOG"),
];

/// Print a one-time migration hint when a deprecated key is set and its
/// replacement is not.
fn warn_deprecated_env_vars() {
    use std::sync::Once;
    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        let mut hints = Vec::new();
        for (deprecated, recommended) in DEPRECATED_PAIRS {
            if env::var(deprecated).is_ok() && env::var(recommended).is_err() {
                hints.push(format!("{} → {}", deprecated, recommended));
            }
        }
        if !hints.is_empty() {
            tracing::warn!(
                "[DEPRECATED] the following environment variables are deprecated:\n   {}",
                hints.join("\n   ")
            );
        }
    });
}

/// Load `.env` from the current directory into the process environment
/// (existing variables are never overwritten). Runs once per process.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let path = env::current_dir()
            .map(|d| d.join(".env"))
            .unwrap_or_else(|_| std::path::PathBuf::from(".env"));
        if let Ok(content) = std::fs::read_to_string(&path) {
            for (key, value) in parse_dotenv(&content) {
                if env::var(&key).is_err() {
                    #[allow(unsafe_code)]
                    unsafe {
                        env::set_var(&key, &value);
                    }
                }
            }
        }
        warn_deprecated_env_vars();
    });
}

/// Parse `KEY=value` lines; `#` comments and surrounding quotes are stripped.
pub(crate) fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();
        // Strip inline comment (# not inside quotes)
        if let Some(hash_pos) = value.find('#') {
            let before_hash = value[..hash_pos].trim_end();
            if !before_hash.contains('"') && !before_hash.contains('\'') {
                value = before_hash;
            }
        }
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Read the primary key or its aliases; fall back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Read the primary key or its aliases; empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Boolean keys: 0/false/no/off are false, any other value is true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Numeric keys; unparsable values fall back to `default` with a warning.
pub fn env_u64(primary: &str, aliases: &[&str], default: u64) -> u64 {
    match env_optional(primary, aliases) {
        Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}: {}, using default ({})", primary, raw, default);
            default
        }),
        None => default,
    }
}
