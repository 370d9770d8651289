//! RuntimeResolver trait: extension point for new runtimes.
//!
//! The engine asks the resolver for an interpreter before every run. New
//! languages plug in by implementing the trait.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use codebridge_core::config::SandboxSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Node,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "node" | "nodejs" | "javascript" | "js" => Ok(Language::Node),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// Resolved runtime for a given language: interpreter path and optional env vars.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    /// Canonical path to the interpreter executable
    pub interpreter: PathBuf,
    /// Extra environment variables passed into the isolation
    pub extra_env: Vec<(String, String)>,
}

impl ResolvedRuntime {
    /// Installation prefix (`/opt/py` for `/opt/py/bin/python3`). Backends
    /// that hide the host filesystem mount it read-only.
    pub fn prefix(&self) -> Option<PathBuf> {
        self.interpreter
            .parent()
            .and_then(|bin| bin.parent())
            .map(PathBuf::from)
    }
}

pub trait RuntimeResolver: Send + Sync {
    /// `None` when no interpreter is available for `language`.
    fn resolve(&self, language: Language) -> Option<ResolvedRuntime>;
}

/// `which` lookup, overridable with CODEBRIDGE_PYTHON / CODEBRIDGE_NODE.
#[derive(Debug, Clone, Default)]
pub struct SystemRuntimeResolver {
    python: Option<PathBuf>,
    node: Option<PathBuf>,
}

impl SystemRuntimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_settings(&SandboxSettings::from_env())
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            python: settings.python.as_ref().map(PathBuf::from),
            node: settings.node.as_ref().map(PathBuf::from),
        }
    }

    pub fn with_python(mut self, path: impl Into<PathBuf>) -> Self {
        self.python = Some(path.into());
        self
    }

    pub fn with_node(mut self, path: impl Into<PathBuf>) -> Self {
        self.node = Some(path.into());
        self
    }

    fn lookup(configured: Option<&PathBuf>, candidates: &[&str]) -> Option<PathBuf> {
        let found = match configured {
            Some(p) if p.components().count() > 1 => Some(p.clone()),
            Some(p) => which::which(p).ok(),
            None => candidates.iter().find_map(|c| which::which(c).ok()),
        }?;
        // Canonical so the prefix can be mounted at the same path.
        std::fs::canonicalize(&found).ok()
    }
}

impl RuntimeResolver for SystemRuntimeResolver {
    fn resolve(&self, language: Language) -> Option<ResolvedRuntime> {
        let interpreter = match language {
            Language::Python => Self::lookup(self.python.as_ref(), &["python3", "python"]),
            Language::Node => Self::lookup(self.node.as_ref(), &["node", "nodejs"]),
        }?;
        Some(ResolvedRuntime {
            interpreter,
            extra_env: Vec::new(),
        })
    }
}
