//! codebridge-bridge: the host side of the sandbox call bridge.
//!
//! One HTTP/1.1 endpoint on a Unix domain socket. Every request carries the
//! session's bridge token; the token is checked before anything else runs.

pub mod server;
pub mod wire;

pub use server::{bridge_app, BridgeServer, BridgeState, MAX_BODY_BYTES};
pub use wire::{BridgeRequest, BridgeResponse};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind bridge socket {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),
}
