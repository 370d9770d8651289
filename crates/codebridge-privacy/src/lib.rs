//! codebridge-privacy: reversible PII tokenization.
//!
//! Sensitive values leaving the sandbox towards the model side are replaced by
//! `[CATEGORY_N]` tokens; the per-session vault maps them back before a value
//! reaches an external capability.
//!
//! - `rules`: ordered `(category, pattern)` detection rules
//! - `transform`: span selection and JSON walking
//! - `vault`: the per-session bidirectional table
//! - `store`: `TokenizationService`, one vault per open session

pub mod rules;
pub mod store;
pub mod transform;
pub mod vault;

pub use rules::{PiiRule, PiiRuleSet, PiiRuleSetBuilder};
pub use store::TokenizationService;
pub use vault::PiiVault;

#[derive(Debug, thiserror::Error)]
pub enum PrivacyError {
    #[error("invalid PII category {0:?}: expected [A-Z][A-Z0-9_]*")]
    InvalidCategory(String),
    #[error("invalid pattern for {category}: {source}")]
    InvalidPattern {
        category: String,
        #[source]
        source: regex::Error,
    },
    #[error("no open tokenization vault for session {0}")]
    VaultClosed(String),
}

pub type Result<T> = std::result::Result<T, PrivacyError>;
