//! Per-run resource limits.

use codebridge_core::config::LimitsConfig;

/// Ceilings applied to every run. Zero values are clamped to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall clock, seconds (default: 30)
    pub timeout_secs: u64,
    /// RSS of the whole process tree, MB (default: 256)
    pub max_memory_mb: u64,
    /// CPU time, seconds, enforced with RLIMIT_CPU (default: 30)
    pub cpu_secs: u64,
    /// Bytes of stdout/stderr kept as logs (default: 1 MiB)
    pub max_log_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_env()
    }
}

impl From<LimitsConfig> for ResourceLimits {
    fn from(cfg: LimitsConfig) -> Self {
        Self {
            timeout_secs: cfg.timeout_secs.max(1),
            max_memory_mb: cfg.max_memory_mb.max(1),
            cpu_secs: cfg.cpu_secs.max(1),
            max_log_bytes: cfg.max_log_bytes,
        }
    }
}

impl ResourceLimits {
    /// Get memory limit in bytes
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb * 1024 * 1024
    }

    /// Load resource limits from environment variables
    pub fn from_env() -> Self {
        LimitsConfig::from_env().into()
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(
        mut self,
        cli_max_memory: Option<u64>,
        cli_timeout: Option<u64>,
        cli_cpu: Option<u64>,
    ) -> Self {
        if let Some(max_memory) = cli_max_memory {
            self.max_memory_mb = max_memory.max(1);
        }
        if let Some(timeout) = cli_timeout {
            self.timeout_secs = timeout.max(1);
        }
        if let Some(cpu) = cli_cpu {
            self.cpu_secs = cpu.max(1);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let base = ResourceLimits {
            timeout_secs: 30,
            max_memory_mb: 256,
            cpu_secs: 30,
            max_log_bytes: 1024,
        };
        let l = base.with_cli_overrides(Some(64), None, Some(0));
        assert_eq!(l.max_memory_mb, 64);
        assert_eq!(l.timeout_secs, 30);
        assert_eq!(l.cpu_secs, 1);
        assert_eq!(l.max_memory_bytes(), 64 * 1024 * 1024);
    }
}
