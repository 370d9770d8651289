//! The tool-call router: strategy resolution and dispatch.

use std::sync::Arc;
use std::time::Instant;

use codebridge_privacy::TokenizationService;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::CapabilityRegistry;
use crate::schema::normalize_input;
use crate::stats::ToolStats;
use crate::strategy::{resolve_strategy, Strategy};
use crate::{filesystem, meta, Result, RouterError};

/// One tool invocation as seen by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContext {
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub session_id: String,
    /// Optional override; invalid values are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl ToolCallContext {
    pub fn new(tool_name: impl Into<String>, input: Value, session_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            session_id: session_id.into(),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

/// Exactly one per [`ToolCallContext`]. `result` and `error` are already
/// tokenized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub strategy: Strategy,
    pub elapsed_ms: u64,
}

pub struct ToolRouter {
    registry: CapabilityRegistry,
    privacy: Arc<TokenizationService>,
    stats: ToolStats,
}

impl ToolRouter {
    pub fn new(registry: CapabilityRegistry, privacy: Arc<TokenizationService>) -> Self {
        Self {
            registry,
            privacy,
            stats: ToolStats::new(),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn privacy(&self) -> &Arc<TokenizationService> {
        &self.privacy
    }

    pub fn stats(&self) -> &ToolStats {
        &self.stats
    }

    /// Resolve a strategy and dispatch. Never panics on capability failure;
    /// every outcome is folded into the returned result.
    pub async fn route(&self, ctx: ToolCallContext) -> ToolCallResult {
        let started = Instant::now();
        let strategy = resolve_strategy(&ctx.tool_name, ctx.strategy.as_deref());

        let outcome = match strategy {
            Strategy::Meta => meta::handle(&self.registry, &ctx.tool_name, &ctx.input),
            Strategy::Filesystem => filesystem::handle(&self.registry, &ctx.tool_name, &ctx.input),
            Strategy::McpDirect => self.dispatch_direct(&ctx).await,
        }
        .and_then(|value| {
            self.privacy
                .tokenize(&ctx.session_id, &value)
                .map_err(RouterError::from)
        });

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = match outcome {
            Ok(value) => ToolCallResult {
                success: true,
                result: Some(value),
                error: None,
                strategy,
                elapsed_ms,
            },
            Err(e) => {
                let message = e.to_string();
                let message = self
                    .privacy
                    .tokenize_text(&ctx.session_id, &message)
                    .unwrap_or_else(|_| self.privacy.redact_text(&message));
                ToolCallResult {
                    success: false,
                    result: None,
                    error: Some(message),
                    strategy,
                    elapsed_ms,
                }
            }
        };

        self.stats.record(&ctx.tool_name, result.success, elapsed_ms);
        tracing::debug!(
            tool = %ctx.tool_name,
            strategy = %strategy,
            success = result.success,
            elapsed_ms,
            "tool call routed"
        );
        result
    }

    /// describe → validate → detokenize → invoke. Output tokenization happens
    /// in [`ToolRouter::route`].
    async fn dispatch_direct(&self, ctx: &ToolCallContext) -> Result<Value> {
        let name = ctx.tool_name.as_str();
        let descriptor = self
            .registry
            .describe(name)
            .ok_or_else(|| RouterError::UnknownCapability(name.to_string()))?;
        if !self.privacy.is_open(&ctx.session_id) {
            return Err(codebridge_privacy::PrivacyError::VaultClosed(ctx.session_id.clone()).into());
        }

        let input = normalize_input(&descriptor.input_schema, ctx.input.clone());
        self.registry.validate(name, &input)?;

        let raw_input = self.privacy.detokenize(&ctx.session_id, &input);
        self.registry.invoke(name, raw_input).await
    }
}
