//! Strategy resolution: a pure, total function of the tool name and the
//! optional override.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "meta")]
    Meta,
    #[serde(rename = "filesystem")]
    Filesystem,
    #[serde(rename = "mcp-direct")]
    McpDirect,
}

/// Discovery operations answered from the registry.
pub const META_OPERATIONS: &[&str] = &[
    "list_capabilities",
    "describe_capability",
    "search_capabilities",
];

/// Read-only views over the virtual `/servers` tree.
pub const FILESYSTEM_OPERATIONS: &[&str] = &["fs_list", "fs_read", "fs_tree"];

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Meta => "meta",
            Strategy::Filesystem => "filesystem",
            Strategy::McpDirect => "mcp-direct",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(Strategy::Meta),
            "filesystem" => Ok(Strategy::Filesystem),
            "mcp-direct" => Ok(Strategy::McpDirect),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Precedence: valid override, meta name, filesystem name, direct.
/// An unrecognised override is logged and ignored.
pub fn resolve_strategy(tool_name: &str, override_: Option<&str>) -> Strategy {
    if let Some(raw) = override_ {
        match raw.parse::<Strategy>() {
            Ok(strategy) => return strategy,
            Err(_) => tracing::warn!(tool_name, "ignoring invalid strategy override {:?}", raw),
        }
    }
    if META_OPERATIONS.contains(&tool_name) {
        Strategy::Meta
    } else if FILESYSTEM_OPERATIONS.contains(&tool_name) {
        Strategy::Filesystem
    } else {
        Strategy::McpDirect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        assert_eq!(resolve_strategy("list_capabilities", None), Strategy::Meta);
        assert_eq!(resolve_strategy("fs_read", None), Strategy::Filesystem);
        assert_eq!(resolve_strategy("crm.lookup", None), Strategy::McpDirect);
        assert_eq!(resolve_strategy("does_not_exist", None), Strategy::McpDirect);
        assert_eq!(
            resolve_strategy("crm.lookup", Some("meta")),
            Strategy::Meta
        );
        assert_eq!(
            resolve_strategy("fs_list", Some("mcp-direct")),
            Strategy::McpDirect
        );
    }

    #[test]
    fn test_invalid_override_falls_through() {
        assert_eq!(
            resolve_strategy("describe_capability", Some("bogus")),
            Strategy::Meta
        );
        assert_eq!(resolve_strategy("fs_tree", Some("")), Strategy::Filesystem);
        assert_eq!(resolve_strategy("x.y", Some("META")), Strategy::McpDirect);
    }

    #[test]
    fn test_total_and_deterministic() {
        let names = ["", "list_capabilities", "fs_tree", "a.b", "??", "fs_"];
        let overrides = [None, Some("meta"), Some("filesystem"), Some("mcp-direct"), Some("x")];
        for name in names {
            for o in overrides {
                let first = resolve_strategy(name, o);
                assert_eq!(first, resolve_strategy(name, o));
                assert!(matches!(
                    first,
                    Strategy::Meta | Strategy::Filesystem | Strategy::McpDirect
                ));
            }
        }
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&Strategy::McpDirect).unwrap(),
            "\"mcp-direct\""
        );
        for s in [Strategy::Meta, Strategy::Filesystem, Strategy::McpDirect] {
            assert_eq!(s.as_str().parse::<Strategy>().unwrap(), s);
        }
    }
}
