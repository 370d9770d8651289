//! codebridge: run agent-written code in an isolation that reaches host
//! capabilities only through an authenticated, tokenizing bridge.
//!
//! [`Orchestrator`] wires the pieces together: session store, tokenization
//! service, tool router, bridge endpoint and sandbox engine. One
//! [`Orchestrator::execute`] call is one task: a fresh session, one run, and
//! teardown of the session and its vault on every exit path.

pub mod catalog;
pub mod cli;
mod commands;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use codebridge_bridge::{BridgeServer, BridgeState};
use codebridge_core::config::{PathsConfig, SandboxSettings, SessionConfig};
use codebridge_core::observability;
use codebridge_core::{ExecutionResult, SessionStore};
use codebridge_privacy::{PiiRuleSet, TokenizationService};
use codebridge_router::{CapabilityRegistry, ToolRouter};
use codebridge_sandbox::{
    select_backend, BackendKind, Language, ResourceLimits, SandboxBackend, SandboxEngine,
    SystemRuntimeResolver,
};
use serde_json::Value;

pub use commands::run_cli;

/// Everything needed to start an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub paths: PathsConfig,
    pub session: SessionConfig,
    pub limits: ResourceLimits,
    pub backend: BackendKind,
    pub language: Language,
    pub runtimes: SystemRuntimeResolver,
    pub rules: PiiRuleSet,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let settings = SandboxSettings::from_env();
        let backend = match settings.backend.as_deref() {
            Some(b) => b.parse::<BackendKind>().map_err(anyhow::Error::msg)?,
            None => BackendKind::default(),
        };
        let language = match settings.language.as_deref() {
            Some(l) => l.parse::<Language>().map_err(anyhow::Error::msg)?,
            None => Language::default(),
        };
        Ok(Self {
            paths: PathsConfig::from_env(),
            session: SessionConfig::from_env(),
            limits: ResourceLimits::from_env(),
            backend,
            language,
            runtimes: SystemRuntimeResolver::from_settings(&settings),
            rules: PiiRuleSet::default(),
        })
    }

    /// Defaults with every directory under `root`.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig::rooted_at(root),
            session: SessionConfig::default(),
            limits: ResourceLimits::from(codebridge_core::config::LimitsConfig::default()),
            backend: BackendKind::default(),
            language: Language::default(),
            runtimes: SystemRuntimeResolver::new(),
            rules: PiiRuleSet::default(),
        }
    }
}

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    privacy: Arc<TokenizationService>,
    router: Arc<ToolRouter>,
    engine: SandboxEngine,
    bridge: BridgeServer,
}

impl Orchestrator {
    /// Bind the bridge and build the engine. Must be called inside a tokio
    /// runtime.
    pub fn start(config: OrchestratorConfig, registry: CapabilityRegistry) -> Result<Self> {
        let backend = select_backend(config.backend).context("Failed to select sandbox backend")?;
        Self::start_with_backend(config, registry, backend)
    }

    /// Like [`Orchestrator::start`] with an explicit backend.
    pub fn start_with_backend(
        config: OrchestratorConfig,
        registry: CapabilityRegistry,
        backend: Arc<dyn SandboxBackend>,
    ) -> Result<Self> {
        let runtime_dir = config.paths.runtime_dir.clone();
        std::fs::create_dir_all(&runtime_dir)
            .with_context(|| format!("Failed to create runtime dir {}", runtime_dir.display()))?;

        let sessions = Arc::new(SessionStore::new(config.paths.clone(), config.session));
        let privacy = Arc::new(TokenizationService::new(config.rules));
        let router = Arc::new(ToolRouter::new(registry, Arc::clone(&privacy)));

        let socket = runtime_dir.join(format!("bridge-{}.sock", std::process::id()));
        let bridge = BridgeServer::serve_unix(
            socket,
            BridgeState {
                sessions: Arc::clone(&sessions),
                router: Arc::clone(&router),
            },
        )
        .context("Failed to start bridge")?;

        let engine = SandboxEngine::new(
            backend,
            Arc::new(config.runtimes),
            config.limits,
            bridge.socket_path(),
            runtime_dir,
        )
        .with_default_language(config.language);

        tracing::info!(
            backend = engine.backend_name(),
            capabilities = router.registry().len(),
            "orchestrator ready"
        );
        Ok(Self {
            sessions,
            privacy,
            router,
            engine,
            bridge,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn privacy(&self) -> &Arc<TokenizationService> {
        &self.privacy
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    pub fn engine(&self) -> &SandboxEngine {
        &self.engine
    }

    pub fn bridge_socket(&self) -> &Path {
        self.bridge.socket_path()
    }

    /// Run one task for `user_id`. `code = None` opens and closes a session
    /// without starting an isolation.
    ///
    /// The returned result has already been tokenized: output, logs and
    /// error carry tokens, never the raw values capabilities returned.
    pub async fn execute(
        &self,
        user_id: &str,
        code: Option<&str>,
        language: Option<Language>,
    ) -> Result<ExecutionResult> {
        let session = self
            .sessions
            .create(user_id)
            .with_context(|| format!("Failed to create session for {}", user_id))?;
        self.privacy.open(&session.id);
        let _lease = SessionLease {
            sessions: &self.sessions,
            privacy: &self.privacy,
            session_id: session.id.clone(),
        };

        let Some(code) = code else {
            return Ok(ExecutionResult::completed(None, Vec::new(), 0));
        };
        let language = language.unwrap_or(self.engine.default_language());
        observability::audit_execution_started(
            &session.id,
            language.as_str(),
            self.engine.backend_name(),
            code.len(),
        );

        let raw = self.engine.run_in(language, code, &session).await;
        let result = self.protect(&session.id, raw);

        observability::audit_execution_completed(
            &session.id,
            result.status.as_str(),
            result.duration_ms,
            result.logs.len(),
            result.is_success(),
        );
        Ok(result)
    }

    /// Tokenize everything that leaves toward the model side.
    fn protect(&self, session_id: &str, raw: ExecutionResult) -> ExecutionResult {
        let output = raw.output.map(|v| match self.privacy.tokenize(session_id, &v) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session_id, "output tokenization failed, redacting: {}", e);
                Value::String(self.privacy.redact_text(&v.to_string()))
            }
        });
        let logs = raw
            .logs
            .iter()
            .map(|l| self.protect_text(session_id, l))
            .collect();
        let error = raw.error.as_deref().map(|e| self.protect_text(session_id, e));
        ExecutionResult {
            output,
            logs,
            error,
            status: raw.status,
            duration_ms: raw.duration_ms,
        }
    }

    fn protect_text(&self, session_id: &str, text: &str) -> String {
        self.privacy
            .tokenize_text(session_id, text)
            .unwrap_or_else(|_| self.privacy.redact_text(text))
    }

    /// Stop the bridge and remove its socket.
    pub async fn shutdown(self) {
        self.bridge.shutdown().await;
    }
}

/// Closes the vault and destroys the session on drop, so teardown also runs
/// when the caller cancels `execute`.
struct SessionLease<'a> {
    sessions: &'a SessionStore,
    privacy: &'a TokenizationService,
    session_id: String,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.privacy.close(&self.session_id);
        if !self.sessions.destroy(&self.session_id) {
            tracing::warn!(session_id = %self.session_id, "session already gone at teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebridge_sandbox::HostBackend;

    #[tokio::test]
    async fn test_execute_without_code_tears_down() {
        let root = tempfile::tempdir().unwrap();
        let orch = Orchestrator::start_with_backend(
            OrchestratorConfig::rooted_at(root.path()),
            CapabilityRegistry::builder().build(),
            Arc::new(HostBackend),
        )
        .unwrap();
        assert!(orch.bridge_socket().exists());

        let result = orch.execute("alice", None, None).await.unwrap();
        assert!(result.is_success());
        assert_eq!(orch.sessions().active_count(), 0);
        assert_eq!(orch.privacy().open_sessions(), 0);

        assert!(orch.execute("../etc", None, None).await.is_err());

        let socket = orch.bridge_socket().to_path_buf();
        orch.shutdown().await;
        assert!(!socket.exists());
    }
}
