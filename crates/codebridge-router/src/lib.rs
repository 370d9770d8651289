//! codebridge-router: capability registry and the tool-call router.
//!
//! Every bridge call is resolved to exactly one strategy:
//! - `meta`: discovery over the registry (list, describe, search)
//! - `filesystem`: read-only virtual tree `/servers/<category>/<op>.json`
//! - `mcp-direct`: validated, detokenized pass-through to a capability

pub mod capability;
pub mod filesystem;
pub mod meta;
pub mod registry;
pub mod router;
pub mod schema;
pub mod stats;
pub mod strategy;

pub use capability::{Capability, CapabilityDescriptor, FnCapability};
pub use registry::{CapabilityRegistry, RegistryBuilder};
pub use router::{ToolCallContext, ToolCallResult, ToolRouter};
pub use stats::{ToolCounters, ToolStats};
pub use strategy::{resolve_strategy, Strategy};

/// Router-level failures. Display strings start with the error class so they
/// can be matched by agent code.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("UnknownCapability: {0}")]
    UnknownCapability(String),
    #[error("CapabilityExecutionFailure: {name}: {message}")]
    CapabilityExecutionFailure { name: String, message: String },
    #[error("MalformedToolInvocation: {0}")]
    MalformedToolInvocation(String),
    #[error("DuplicateCapability: {0}")]
    DuplicateCapability(String),
    #[error("InvalidSchema: {name}: {message}")]
    InvalidSchema { name: String, message: String },
    #[error(transparent)]
    Privacy(#[from] codebridge_privacy::PrivacyError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
