//! Unified configuration layer.
//!
//! Every environment variable read lives here; the rest of the workspace goes
//! through the structured configs instead of calling `std::env::var` directly.
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool`, `env_u64`, `.env` loading
//! - `schema`: `LimitsConfig`, `PathsConfig`, `SessionConfig`, `SandboxSettings`,
//!   `ObservabilityConfig`
//! - `env_keys`: key constants (with legacy aliases)

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
pub use schema::{
    LimitsConfig, ObservabilityConfig, PathsConfig, SandboxSettings, SessionConfig,
};
