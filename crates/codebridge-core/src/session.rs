//! Per-task sessions: identity, bridge credential, directories and run epoch.
//!
//! Sessions live in an explicit [`SessionStore`] shared by `Arc`. Lifecycle is
//! `create → use → destroy`; a destroyed session's token is gone from the
//! index, so every later bridge call with it fails authentication.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex, MutexGuard};
use uuid::Uuid;

use crate::config::{PathsConfig, SessionConfig};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("UnauthorizedBridgeCall: unknown or revoked session token")]
    Unauthorized,
    #[error("UnauthorizedBridgeCall: session {0} expired")]
    Expired(String),
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// One task invocation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    auth_token: String,
    /// Persistent per-user directory, `<skills_root>/<user_id>`.
    pub skills_dir: PathBuf,
    /// Ephemeral directory, removed when the session is destroyed.
    pub workspace_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    run_epoch: watch::Sender<u64>,
    dispatch_lock: Mutex<()>,
}

impl Session {
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.deadline
    }

    pub fn current_epoch(&self) -> u64 {
        *self.run_epoch.borrow()
    }

    /// Mark the current run as finished. Every bridge call waiting on
    /// [`Session::run_finished`] for an earlier epoch is released.
    pub fn end_run(&self) {
        self.run_epoch.send_modify(|e| *e += 1);
    }

    /// Resolves once the epoch moves past `epoch`.
    pub async fn run_finished(&self, epoch: u64) {
        let mut rx = self.run_epoch.subscribe();
        let _ = rx.wait_for(|e| *e != epoch).await;
    }

    /// FIFO turn for bridge dispatch. Calls of one session run in arrival
    /// order; other sessions are unaffected.
    pub async fn dispatch_turn(&self) -> MutexGuard<'_, ()> {
        self.dispatch_lock.lock().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.workspace_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.workspace_dir);
        }
    }
}

#[derive(Default)]
struct Index {
    by_id: HashMap<String, Arc<Session>>,
    by_token: HashMap<String, String>,
}

/// Live sessions, indexed by id and by bridge token.
pub struct SessionStore {
    paths: PathsConfig,
    ttl: Duration,
    index: RwLock<Index>,
}

impl SessionStore {
    pub fn new(paths: PathsConfig, config: SessionConfig) -> Self {
        // Capped at ten years so the deadline arithmetic cannot overflow.
        let ttl_secs = config.ttl_secs.min(315_360_000) as i64;
        Self {
            paths,
            ttl: Duration::seconds(ttl_secs),
            index: RwLock::new(Index::default()),
        }
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Create a session: fresh id and token, persistent skills dir, new
    /// workspace dir (mode 0700).
    pub fn create(&self, user_id: &str) -> Result<Arc<Session>> {
        validate_user_id(user_id)?;

        let id = Uuid::new_v4().to_string();
        let auth_token = mint_token();

        let skills_dir = self.paths.skills_root.join(user_id);
        std::fs::create_dir_all(&skills_dir)?;

        let workspace_dir = self.paths.runtime_dir.join("workspaces").join(&id);
        std::fs::create_dir_all(&workspace_dir)?;
        restrict_permissions(&workspace_dir)?;

        let created_at = Utc::now();
        let (run_epoch, _) = watch::channel(0u64);
        let session = Arc::new(Session {
            id: id.clone(),
            user_id: user_id.to_string(),
            auth_token: auth_token.clone(),
            skills_dir,
            workspace_dir,
            created_at,
            deadline: created_at + self.ttl,
            run_epoch,
            dispatch_lock: Mutex::new(()),
        });

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index.by_token.insert(auth_token, id.clone());
        index.by_id.insert(id.clone(), Arc::clone(&session));
        drop(index);

        tracing::debug!(session_id = %id, user_id, "session created");
        crate::observability::audit_session_created(&id, user_id);
        Ok(session)
    }

    /// Resolve a bridge token to its live session. Unknown, revoked and
    /// expired tokens all fail.
    pub fn authenticate(&self, token: &str) -> Result<Arc<Session>> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let session = index
            .by_token
            .get(token)
            .and_then(|id| index.by_id.get(id))
            .cloned()
            .ok_or(SessionError::Unauthorized)?;
        drop(index);
        if session.is_expired() {
            return Err(SessionError::Expired(session.id.clone()));
        }
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.by_id.get(session_id).cloned()
    }

    /// Revoke the token, cancel in-flight bridge calls and remove the
    /// workspace. Failures are logged, never returned.
    pub fn destroy(&self, session_id: &str) -> bool {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let Some(session) = index.by_id.remove(session_id) else {
            return false;
        };
        index.by_token.remove(session.auth_token());
        drop(index);

        session.end_run();
        if let Err(e) = remove_workspace(&session.workspace_dir) {
            tracing::warn!(
                session_id,
                "failed to remove workspace {}: {}",
                session.workspace_dir.display(),
                e
            );
        }
        crate::observability::audit_session_destroyed(session_id);
        tracing::debug!(session_id, "session destroyed");
        true
    }

    pub fn active_count(&self) -> usize {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.by_id.len()
    }

    /// Destroy every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<String> = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            index
                .by_id
                .values()
                .filter(|s| s.is_expired())
                .map(|s| s.id.clone())
                .collect()
        };
        expired.iter().filter(|id| self.destroy(id)).count()
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    let ok = !user_id.is_empty()
        && user_id.len() <= 64
        && user_id != "."
        && user_id != ".."
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SessionError::InvalidUserId(user_id.to_string()))
    }
}

/// 64 hex chars: SHA-256 over two independent v4 UUIDs.
fn mint_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

fn remove_workspace(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> SessionStore {
        SessionStore::new(PathsConfig::rooted_at(root), SessionConfig::default())
    }

    #[test]
    fn test_create_and_authenticate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let s = store.create("alice").unwrap();

        assert_eq!(s.auth_token().len(), 64);
        assert!(s.workspace_dir.is_dir());
        assert_eq!(s.skills_dir, tmp.path().join("skills").join("alice"));
        assert!(s.deadline > s.created_at);

        let found = store.authenticate(s.auth_token()).unwrap();
        assert_eq!(found.id, s.id);
        assert!(matches!(
            store.authenticate("not-a-token"),
            Err(SessionError::Unauthorized)
        ));
    }

    #[test]
    fn test_tokens_are_unique_per_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let a = store.create("alice").unwrap();
        let b = store.create("alice").unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.auth_token(), b.auth_token());
        assert_ne!(a.workspace_dir, b.workspace_dir);
        assert_eq!(a.skills_dir, b.skills_dir);
    }

    #[test]
    fn test_destroy_revokes_token_and_removes_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let s = store.create("bob").unwrap();
        let token = s.auth_token().to_string();
        let workspace = s.workspace_dir.clone();
        let skills = s.skills_dir.clone();

        assert!(store.destroy(&s.id));
        assert!(!store.destroy(&s.id));
        assert!(!workspace.exists());
        assert!(skills.exists());
        assert!(store.authenticate(&token).is_err());
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(
            PathsConfig::rooted_at(tmp.path()),
            SessionConfig { ttl_secs: 0 },
        );
        let s = store.create("carol").unwrap();
        assert!(matches!(
            store.authenticate(s.auth_token()),
            Err(SessionError::Expired(_))
        ));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_user_id_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        for bad in ["", ".", "..", "../etc", "a/b", "x y"] {
            assert!(
                matches!(store.create(bad), Err(SessionError::InvalidUserId(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(store.create("user-1.ok_name").is_ok());
    }

    #[tokio::test]
    async fn test_end_run_releases_waiters() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let s = store.create("dave").unwrap();
        let epoch = s.current_epoch();

        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_finished(epoch).await })
        };
        tokio::task::yield_now().await;
        s.end_run();
        tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.current_epoch(), epoch + 1);
    }
}
