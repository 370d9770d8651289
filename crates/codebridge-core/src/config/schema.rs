//! Configuration structs grouped by concern.
//!
//! All of them load from the environment with the shared fallback logic.

use super::env_keys::{limits, observability as obv_keys, paths, sandbox, session};
use super::loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
use std::path::PathBuf;
use std::sync::OnceLock;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_MEMORY_MB: u64 = 256;
pub const DEFAULT_CPU_SECS: u64 = 30;
pub const DEFAULT_MAX_LOG_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 900;

fn codebridge_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".codebridge")
}

/// Per-run resource ceilings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    pub timeout_secs: u64,
    pub max_memory_mb: u64,
    pub cpu_secs: u64,
    pub max_log_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            cpu_secs: DEFAULT_CPU_SECS,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }
}

impl LimitsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            timeout_secs: env_u64(
                limits::CODEBRIDGE_TIMEOUT_SECS,
                limits::TIMEOUT_ALIASES,
                DEFAULT_TIMEOUT_SECS,
            ),
            max_memory_mb: env_u64(
                limits::CODEBRIDGE_MAX_MEMORY_MB,
                limits::MAX_MEMORY_ALIASES,
                DEFAULT_MAX_MEMORY_MB,
            ),
            cpu_secs: env_u64(limits::CODEBRIDGE_CPU_SECS, limits::CPU_ALIASES, DEFAULT_CPU_SECS),
            max_log_bytes: env_u64(limits::CODEBRIDGE_MAX_LOG_BYTES, &[], DEFAULT_MAX_LOG_BYTES),
        }
    }
}

/// Skills root, runtime directory and capability catalog
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Persistent per-user skills live under `<skills_root>/<user_id>/`.
    pub skills_root: PathBuf,
    /// Workspaces, per-run scratch dirs and the bridge socket.
    pub runtime_dir: PathBuf,
    pub catalog: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let skills_root = env_optional(paths::CODEBRIDGE_SKILLS_ROOT, paths::SKILLS_ROOT_ALIASES)
            .map(PathBuf::from)
            .unwrap_or_else(|| codebridge_home().join("skills"));
        let runtime_dir = env_optional(paths::CODEBRIDGE_RUNTIME_DIR, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| codebridge_home().join("run"));
        let catalog = env_optional(paths::CODEBRIDGE_CATALOG, &[]).map(PathBuf::from);
        Self {
            skills_root,
            runtime_dir,
            catalog,
        }
    }

    /// Everything under one directory; used by tests and embedders.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            skills_root: root.join("skills"),
            runtime_dir: root.join("run"),
            catalog: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            ttl_secs: env_u64(
                session::CODEBRIDGE_SESSION_TTL_SECS,
                &[],
                DEFAULT_SESSION_TTL_SECS,
            ),
        }
    }
}

/// Backend selection and interpreter overrides
#[derive(Debug, Clone, Default)]
pub struct SandboxSettings {
    /// `auto`, `bwrap` or `host`; parsed by the sandbox crate.
    pub backend: Option<String>,
    pub python: Option<String>,
    pub node: Option<String>,
    pub language: Option<String>,
}

impl SandboxSettings {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            backend: env_optional(sandbox::CODEBRIDGE_SANDBOX_BACKEND, &[]),
            python: env_optional(sandbox::CODEBRIDGE_PYTHON, &[]),
            node: env_optional(sandbox::CODEBRIDGE_NODE, &[]),
            language: env_optional(sandbox::CODEBRIDGE_LANGUAGE, &[]),
        }
    }
}

/// Logging and audit
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    /// Cached after the first call; the environment is read once per process.
    pub fn from_env() -> &'static Self {
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::CODEBRIDGE_QUIET, obv_keys::QUIET_ALIASES, false),
                log_level: env_or(
                    obv_keys::CODEBRIDGE_LOG_LEVEL,
                    obv_keys::LOG_LEVEL_ALIASES,
                    || "codebridge=info".to_string(),
                ),
                log_json: env_bool(obv_keys::CODEBRIDGE_LOG_JSON, obv_keys::LOG_JSON_ALIASES, false),
                audit_log: env_optional(obv_keys::CODEBRIDGE_AUDIT_LOG, obv_keys::AUDIT_LOG_ALIASES),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_paths() {
        let p = PathsConfig::rooted_at("/tmp/cb");
        assert_eq!(p.skills_root, PathBuf::from("/tmp/cb/skills"));
        assert_eq!(p.runtime_dir, PathBuf::from("/tmp/cb/run"));
        assert!(p.catalog.is_none());
    }

    #[test]
    fn test_session_default_ttl() {
        assert_eq!(SessionConfig::default().ttl_secs, 900);
    }
}
