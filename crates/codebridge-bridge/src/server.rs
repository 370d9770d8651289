//! Bridge endpoint: axum app plus the Unix socket accept loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use codebridge_core::observability;
use codebridge_core::SessionStore;
use codebridge_router::{ToolCallContext, ToolRouter};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde_json::{json, Value};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::Service;

use crate::wire::{BridgeRequest, BridgeResponse};
use crate::BridgeError;

/// Same cap as a single stdio request.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct BridgeState {
    pub sessions: Arc<SessionStore>,
    pub router: Arc<ToolRouter>,
}

pub fn bridge_app(state: BridgeState) -> Router {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health(State(state): State<BridgeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeSessions": state.sessions.active_count(),
    }))
}

async fn invoke(State(state): State<BridgeState>, body: Bytes) -> (StatusCode, Json<BridgeResponse>) {
    let started = Instant::now();

    let req: BridgeRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            observability::audit_bridge_rejected(None, "malformed request");
            return (
                StatusCode::BAD_REQUEST,
                Json(BridgeResponse::failure(format!(
                    "MalformedToolInvocation: invalid bridge request: {}",
                    e
                ))),
            );
        }
    };

    // Authentication gates everything below, including routing.
    let session = match state.sessions.authenticate(&req.auth_token) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(tool = %req.tool_name, "bridge call rejected: {}", e);
            observability::audit_bridge_rejected(Some(&req.tool_name), &e.to_string());
            return (
                StatusCode::UNAUTHORIZED,
                Json(BridgeResponse::failure(e.to_string())),
            );
        }
    };

    let epoch = session.current_epoch();
    let ctx = ToolCallContext {
        tool_name: req.tool_name,
        input: req.input,
        session_id: session.id.clone(),
        strategy: req.strategy,
    };
    let routed = async {
        let _turn = session.dispatch_turn().await;
        state.router.route(ctx).await
    };

    tokio::select! {
        result = routed => (StatusCode::OK, Json(BridgeResponse::from(result))),
        _ = session.run_finished(epoch) => {
            tracing::debug!(session_id = %session.id, "bridge call cancelled: run ended");
            (
                StatusCode::OK,
                Json(BridgeResponse::cancelled(
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                )),
            )
        }
    }
}

/// A running bridge bound to a Unix socket. Dropping it stops the accept
/// loop and removes the socket file.
pub struct BridgeServer {
    socket_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Bind `path` (mode 0600, stale file replaced) and start serving.
    /// Must be called inside a tokio runtime.
    pub fn serve_unix(path: impl Into<PathBuf>, state: BridgeState) -> Result<Self, BridgeError> {
        let socket_path = path.into();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path).map_err(|source| BridgeError::Bind {
            path: socket_path.display().to_string(),
            source,
        })?;
        restrict_socket(&socket_path)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = bridge_app(state);
        let task = tokio::spawn(accept_loop(listener, app, shutdown_rx));
        tracing::info!("bridge listening on {}", socket_path.display());

        Ok(Self {
            socket_path,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        remove_socket(&self.socket_path);
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        remove_socket(&self.socket_path);
    }
}

async fn accept_loop(listener: UnixListener, app: Router, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!("bridge accept failed: {}", e);
                        continue;
                    }
                };
                let app = app.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        app.clone().call(req)
                    });
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!("bridge connection closed with error: {}", e);
                    }
                });
            }
        }
    }
    tracing::debug!("bridge accept loop stopped");
}

fn remove_socket(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("failed to remove bridge socket {}: {}", path.display(), e);
        }
    }
}

fn restrict_socket(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
