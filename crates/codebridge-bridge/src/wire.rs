//! Bridge wire types (JSON, camelCase).

use codebridge_router::ToolCallResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /invoke` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub auth_token: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl BridgeResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            strategy: None,
            elapsed_ms: 0,
        }
    }

    pub fn cancelled(elapsed_ms: u64) -> Self {
        Self {
            elapsed_ms,
            ..Self::failure("cancelled")
        }
    }
}

impl From<ToolCallResult> for BridgeResponse {
    fn from(r: ToolCallResult) -> Self {
        Self {
            success: r.success,
            result: r.result,
            error: r.error,
            strategy: Some(r.strategy.as_str().to_string()),
            elapsed_ms: r.elapsed_ms,
        }
    }
}
