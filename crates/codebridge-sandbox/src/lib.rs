//! codebridge-sandbox: runs agent-authored code in a resource-bounded
//! isolation and collects `ExecutionResult`s.
//!
//! Backends: bubblewrap + seccomp on Linux, plain host process when explicitly
//! selected. Both share the same limits, prelude and result protocol.

pub mod backend;
pub mod common;
pub mod engine;
pub mod lifecycle;
pub mod prelude;
pub mod runner;
pub mod runtime_resolver;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub mod seccomp;

pub use backend::{select_backend, BackendKind, HostBackend, SandboxBackend};
pub use engine::SandboxEngine;
pub use lifecycle::{RunLifecycle, RunState};
pub use runner::ResourceLimits;
pub use runtime_resolver::{Language, ResolvedRuntime, RuntimeResolver, SystemRuntimeResolver};

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no interpreter available for {0}")]
    RuntimeUnavailable(String),
    #[error("sandbox backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("failed to spawn isolated process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },
}
