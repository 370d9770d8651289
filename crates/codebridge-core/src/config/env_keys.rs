//! Environment variable keys and their aliases.
//!
//! Primary keys use the `CODEBRIDGE_*` prefix; the short `BRIDGE_*` forms are
//! accepted for compatibility with older deployments.

/// Sandbox resource limits
pub mod limits {
    pub const CODEBRIDGE_TIMEOUT_SECS: &str = "CODEBRIDGE_TIMEOUT_SECS";
    pub const TIMEOUT_ALIASES: &[&str] = &["BRIDGE_TIMEOUT_SECS"];

    pub const CODEBRIDGE_MAX_MEMORY_MB: &str = "CODEBRIDGE_MAX_MEMORY_MB";
    pub const MAX_MEMORY_ALIASES: &[&str] = &["BRIDGE_MAX_MEMORY_MB"];

    pub const CODEBRIDGE_CPU_SECS: &str = "CODEBRIDGE_CPU_SECS";
    pub const CPU_ALIASES: &[&str] = &["BRIDGE_CPU_SECS"];

    pub const CODEBRIDGE_MAX_LOG_BYTES: &str = "CODEBRIDGE_MAX_LOG_BYTES";
}

/// Sandbox backend and interpreters
pub mod sandbox {
    /// `auto` (default), `bwrap` or `host`.
    pub const CODEBRIDGE_SANDBOX_BACKEND: &str = "CODEBRIDGE_SANDBOX_BACKEND";
    pub const CODEBRIDGE_PYTHON: &str = "CODEBRIDGE_PYTHON";
    pub const CODEBRIDGE_NODE: &str = "CODEBRIDGE_NODE";
    pub const CODEBRIDGE_LANGUAGE: &str = "CODEBRIDGE_LANGUAGE";
}

/// Skills, runtime directory, capability catalog
pub mod paths {
    pub const CODEBRIDGE_SKILLS_ROOT: &str = "CODEBRIDGE_SKILLS_ROOT";
    pub const SKILLS_ROOT_ALIASES: &[&str] = &["BRIDGE_SKILLS_ROOT"];

    pub const CODEBRIDGE_RUNTIME_DIR: &str = "CODEBRIDGE_RUNTIME_DIR";

    pub const CODEBRIDGE_CATALOG: &str = "CODEBRIDGE_CATALOG";
}

/// Session lifetime
pub mod session {
    pub const CODEBRIDGE_SESSION_TTL_SECS: &str = "CODEBRIDGE_SESSION_TTL_SECS";
}

/// Observability and logging
pub mod observability {
    pub const CODEBRIDGE_QUIET: &str = "CODEBRIDGE_QUIET";
    pub const QUIET_ALIASES: &[&str] = &["BRIDGE_QUIET"];

    pub const CODEBRIDGE_LOG_LEVEL: &str = "CODEBRIDGE_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &["BRIDGE_LOG_LEVEL"];

    pub const CODEBRIDGE_LOG_JSON: &str = "CODEBRIDGE_LOG_JSON";
    pub const LOG_JSON_ALIASES: &[&str] = &["BRIDGE_LOG_JSON"];

    pub const CODEBRIDGE_AUDIT_LOG: &str = "CODEBRIDGE_AUDIT_LOG";
    pub const AUDIT_LOG_ALIASES: &[&str] = &["BRIDGE_AUDIT_LOG"];
}
