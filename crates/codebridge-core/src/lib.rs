pub mod config;
pub mod observability;
pub mod protocol;
pub mod session;

pub use protocol::{ExecutionResult, RunStatus};
pub use session::{Session, SessionError, SessionStore};
