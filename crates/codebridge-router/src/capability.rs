//! Capability trait and descriptor.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// `crm.lookup_contact` → `crm`; names without a dot → `general`.
    pub fn category(&self) -> &str {
        match self.name.split_once('.') {
            Some((category, _)) if !category.is_empty() => category,
            _ => "general",
        }
    }

    /// `crm.lookup_contact` → `lookup_contact`.
    pub fn operation(&self) -> &str {
        match self.name.split_once('.') {
            Some((category, op)) if !category.is_empty() => op,
            _ => &self.name,
        }
    }
}

/// An external capability callable from sandboxed code.
///
/// `invoke` receives detokenized input and returns raw output; the router
/// tokenizes on the way back.
#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    async fn invoke(&self, input: Value) -> anyhow::Result<Value>;
}

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Adapter turning an async closure into a [`Capability`].
pub struct FnCapability {
    descriptor: CapabilityDescriptor,
    f: Box<dyn Fn(Value) -> BoxFuture + Send + Sync>,
}

impl FnCapability {
    pub fn new<F, Fut>(descriptor: CapabilityDescriptor, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            descriptor,
            f: Box::new(move |input| Box::pin(f(input))),
        }
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> anyhow::Result<Value> {
        (self.f)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_and_operation() {
        let d = CapabilityDescriptor::new("crm.lookup_contact", "", json!({}));
        assert_eq!(d.category(), "crm");
        assert_eq!(d.operation(), "lookup_contact");

        let d = CapabilityDescriptor::new("ping", "", json!({}));
        assert_eq!(d.category(), "general");
        assert_eq!(d.operation(), "ping");

        let d = CapabilityDescriptor::new(".hidden", "", json!({}));
        assert_eq!(d.category(), "general");
    }

    #[test]
    fn test_descriptor_wire_name() {
        let d = CapabilityDescriptor::new("a.b", "desc", json!({"type": "object"}));
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("inputSchema").is_some());
        let back: CapabilityDescriptor =
            serde_json::from_value(json!({"name": "x", "description": "y"})).unwrap();
        assert_eq!(back.input_schema, json!({"type": "object"}));
    }

    #[tokio::test]
    async fn test_fn_capability() {
        let cap = FnCapability::new(
            CapabilityDescriptor::new("math.double", "", json!({})),
            |input: Value| async move {
                Ok::<_, anyhow::Error>(json!(input["n"].as_i64().unwrap_or(0) * 2))
            },
        );
        assert_eq!(cap.invoke(json!({"n": 21})).await.unwrap(), json!(42));
    }
}
