//! Observability: tracing init and the JSONL audit log.
//!
//! Uses config::ObservabilityConfig for CODEBRIDGE_QUIET, LOG_LEVEL, LOG_JSON
//! and AUDIT_LOG. Audit records carry identifiers and sizes only, never the
//! values that crossed the bridge.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup; later calls are no-ops.
/// When CODEBRIDGE_QUIET=1 only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "codebridge=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

/// Override the audit destination (embedders, tests). `None` re-reads config.
pub fn set_audit_path(path: Option<String>) {
    if let Ok(mut guard) = AUDIT_PATH.lock() {
        *guard = path;
    }
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env()
        .audit_log
        .clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn audit(event: &str, mut fields: serde_json::Value) {
    let Some(path) = get_audit_path() else {
        return;
    };
    if let Some(map) = fields.as_object_mut() {
        map.insert(
            "ts".into(),
            json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        map.insert("event".into(), json!(event));
    }
    append_jsonl(&path, &fields);
}

/// Audit: session_created
pub fn audit_session_created(session_id: &str, user_id: &str) {
    audit(
        "session_created",
        json!({ "session_id": session_id, "user_id": user_id }),
    );
}

/// Audit: execution_started (right before spawn)
pub fn audit_execution_started(session_id: &str, language: &str, backend: &str, code_len: usize) {
    audit(
        "execution_started",
        json!({
            "session_id": session_id,
            "language": language,
            "backend": backend,
            "code_len": code_len,
        }),
    );
}

/// Audit: execution_completed
pub fn audit_execution_completed(
    session_id: &str,
    status: &str,
    duration_ms: u64,
    log_lines: usize,
    success: bool,
) {
    audit(
        "execution_completed",
        json!({
            "session_id": session_id,
            "status": status,
            "duration_ms": duration_ms,
            "log_lines": log_lines,
            "success": success,
        }),
    );
}

/// Audit: bridge_rejected (bad or expired token, malformed request)
pub fn audit_bridge_rejected(tool_name: Option<&str>, reason: &str) {
    audit(
        "bridge_rejected",
        json!({ "tool_name": tool_name, "reason": reason }),
    );
}

/// Audit: session_destroyed
pub fn audit_session_destroyed(session_id: &str) {
    audit("session_destroyed", json!({ "session_id": session_id }));
}
