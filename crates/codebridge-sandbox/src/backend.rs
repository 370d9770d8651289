//! SandboxBackend trait: extension point for isolation strategies.
//!
//! A backend decides what the isolated process sees (`IsolationView`) and
//! builds the command that enters the isolation. Limits, prelude and output
//! collection stay in the engine, so every backend gets them unchanged.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use codebridge_core::Session;
use tokio::process::Command;

use crate::runner::ResourceLimits;
use crate::runtime_resolver::{Language, ResolvedRuntime};
use crate::SandboxError;

/// Everything a backend needs to know about one run.
pub struct RunPlan<'a> {
    pub language: Language,
    pub runtime: &'a ResolvedRuntime,
    pub session: &'a Session,
    /// Host path of the bridge socket.
    pub bridge_socket: &'a Path,
    /// Per-run scratch directory on the host, removed after the run.
    pub scratch_dir: &'a Path,
    pub limits: &'a ResourceLimits,
}

/// Paths as seen from inside the isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationView {
    pub workspace: PathBuf,
    pub skills: PathBuf,
    pub bridge_socket: PathBuf,
}

/// Interpreter invocation, independent of the backend.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// A command ready for the engine's limits and pipes. `guards` must stay
/// alive until the process has been spawned.
pub struct PreparedCommand {
    pub command: Command,
    pub guards: Vec<File>,
}

pub trait SandboxBackend: Send + Sync {
    /// Backend name for logging and diagnostics.
    fn name(&self) -> &str;

    fn view(&self, plan: &RunPlan<'_>) -> IsolationView;

    fn command(
        &self,
        plan: &RunPlan<'_>,
        view: &IsolationView,
        invocation: &Invocation,
    ) -> Result<PreparedCommand, SandboxError>;
}

/// Plain child process with the engine's limits and a cleared environment.
/// No filesystem or network isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostBackend;

impl SandboxBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn view(&self, plan: &RunPlan<'_>) -> IsolationView {
        IsolationView {
            workspace: plan.session.workspace_dir.clone(),
            skills: plan.session.skills_dir.clone(),
            bridge_socket: plan.bridge_socket.to_path_buf(),
        }
    }

    fn command(
        &self,
        _plan: &RunPlan<'_>,
        view: &IsolationView,
        invocation: &Invocation,
    ) -> Result<PreparedCommand, SandboxError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&view.workspace);
        Ok(PreparedCommand {
            command,
            guards: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// bwrap when available, otherwise refuse to run.
    #[default]
    Auto,
    Bwrap,
    Host,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(BackendKind::Auto),
            "bwrap" | "bubblewrap" => Ok(BackendKind::Bwrap),
            "host" | "none" => Ok(BackendKind::Host),
            other => Err(format!("unknown sandbox backend: {}", other)),
        }
    }
}

/// Pick a backend. Fails closed: `Auto` never degrades to `Host`.
pub fn select_backend(kind: BackendKind) -> Result<Arc<dyn SandboxBackend>, SandboxError> {
    match kind {
        BackendKind::Host => {
            tracing::warn!(
                "host sandbox backend selected: agent code runs without filesystem or network isolation"
            );
            Ok(Arc::new(HostBackend))
        }
        BackendKind::Auto | BackendKind::Bwrap => bwrap_backend(),
    }
}

#[cfg(target_os = "linux")]
fn bwrap_backend() -> Result<Arc<dyn SandboxBackend>, SandboxError> {
    match crate::linux::BwrapBackend::detect() {
        Some(b) => Ok(Arc::new(b)),
        None => Err(SandboxError::BackendUnavailable(
            "bubblewrap (bwrap) not found. Install it (apt install bubblewrap) or set CODEBRIDGE_SANDBOX_BACKEND=host"
                .to_string(),
        )),
    }
}

#[cfg(not(target_os = "linux"))]
fn bwrap_backend() -> Result<Arc<dyn SandboxBackend>, SandboxError> {
    Err(SandboxError::BackendUnavailable(
        "bwrap isolation is only available on Linux; set CODEBRIDGE_SANDBOX_BACKEND=host to run unisolated"
            .to_string(),
    ))
}
