//! Static capability catalog, frozen once built.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::capability::{Capability, CapabilityDescriptor};
use crate::schema::InputValidator;
use crate::{Result, RouterError};

/// A registered capability with its compiled `inputSchema`.
struct Entry {
    capability: Arc<dyn Capability>,
    validator: InputValidator,
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Arc<BTreeMap<String, Entry>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.list())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Sorted capability names.
    pub fn list(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(name).map(|e| e.capability.descriptor())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.capabilities.values().map(|e| e.capability.descriptor())
    }

    /// Check `input` against the capability's compiled schema.
    pub fn validate(&self, name: &str, input: &Value) -> Result<()> {
        let entry = self
            .capabilities
            .get(name)
            .ok_or_else(|| RouterError::UnknownCapability(name.to_string()))?;
        entry
            .validator
            .validate(input)
            .map_err(|reason| RouterError::MalformedToolInvocation(format!("{}: {}", name, reason)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Sorted, de-duplicated categories.
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .descriptors()
            .map(|d| d.category().to_string())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    /// Run a capability. Errors are wrapped as `CapabilityExecutionFailure`.
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value> {
        let cap = self
            .capabilities
            .get(name)
            .map(|e| Arc::clone(&e.capability))
            .ok_or_else(|| RouterError::UnknownCapability(name.to_string()))?;
        cap.invoke(input)
            .await
            .map_err(|e| RouterError::CapabilityExecutionFailure {
                name: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    capabilities: BTreeMap<String, Entry>,
}

impl RegistryBuilder {
    /// Add a capability; a name can only be registered once.
    pub fn register(mut self, capability: impl Capability + 'static) -> Result<Self> {
        self.insert(Arc::new(capability))?;
        Ok(self)
    }

    /// Fails on an empty or duplicate name, or an `inputSchema` that does not
    /// compile.
    pub fn insert(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = capability.descriptor().name.clone();
        if name.trim().is_empty() {
            return Err(RouterError::MalformedToolInvocation(
                "capability name must not be empty".to_string(),
            ));
        }
        if self.capabilities.contains_key(&name) {
            return Err(RouterError::DuplicateCapability(name));
        }
        let validator = InputValidator::new(&capability.descriptor().input_schema).map_err(
            |message| RouterError::InvalidSchema {
                name: name.clone(),
                message,
            },
        )?;
        self.capabilities.insert(
            name,
            Entry {
                capability,
                validator,
            },
        );
        Ok(())
    }

    pub fn build(self) -> CapabilityRegistry {
        tracing::debug!("capability registry built with {} entries", self.capabilities.len());
        CapabilityRegistry {
            capabilities: Arc::new(self.capabilities),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::FnCapability;
    use serde_json::json;

    pub(crate) fn echo(name: &str) -> FnCapability {
        FnCapability::new(
            CapabilityDescriptor::new(name, format!("echo for {}", name), json!({"type": "object"})),
            |input| async move { Ok::<_, anyhow::Error>(input) },
        )
    }

    #[test]
    fn test_list_sorted_and_categories() {
        let reg = CapabilityRegistry::builder()
            .register(echo("crm.update"))
            .unwrap()
            .register(echo("billing.charge"))
            .unwrap()
            .register(echo("crm.lookup"))
            .unwrap()
            .register(echo("ping"))
            .unwrap()
            .build();
        assert_eq!(
            reg.list(),
            ["billing.charge", "crm.lookup", "crm.update", "ping"]
        );
        assert_eq!(reg.categories(), ["billing", "crm", "general"]);
        assert_eq!(reg.describe("crm.lookup").unwrap().name, "crm.lookup");
        assert!(reg.describe("nope").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = CapabilityRegistry::builder()
            .register(echo("a.b"))
            .unwrap()
            .register(echo("a.b"))
            .err()
            .unwrap();
        assert!(matches!(err, RouterError::DuplicateCapability(ref n) if n == "a.b"));
    }

    #[test]
    fn test_schema_compiled_at_registration() {
        let bad = FnCapability::new(
            CapabilityDescriptor::new("x.bad", "", json!({"type": 17})),
            |input| async move { Ok::<_, anyhow::Error>(input) },
        );
        let err = CapabilityRegistry::builder().register(bad).err().unwrap();
        assert!(matches!(err, RouterError::InvalidSchema { ref name, .. } if name == "x.bad"));

        let strict = FnCapability::new(
            CapabilityDescriptor::new(
                "x.strict",
                "",
                json!({"type": "object", "additionalProperties": false, "properties": {"id": {"type": "integer"}}}),
            ),
            |input| async move { Ok::<_, anyhow::Error>(input) },
        );
        let reg = CapabilityRegistry::builder().register(strict).unwrap().build();
        assert!(reg.validate("x.strict", &json!({"id": 1})).is_ok());
        let err = reg.validate("x.strict", &json!({"id": 1, "more": true})).unwrap_err();
        assert!(err.to_string().starts_with("MalformedToolInvocation: x.strict: "));
        assert!(matches!(
            reg.validate("x.none", &json!({})),
            Err(RouterError::UnknownCapability(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let failing = FnCapability::new(
            CapabilityDescriptor::new("x.fail", "", json!({})),
            |_| async { Err::<Value, _>(anyhow::anyhow!("backend down")) },
        );
        let reg = CapabilityRegistry::builder()
            .register(failing)
            .unwrap()
            .build();

        let err = reg.invoke("x.fail", json!({})).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "CapabilityExecutionFailure: x.fail: backend down"
        );
        let err = reg.invoke("x.none", json!({})).await.unwrap_err();
        assert!(matches!(err, RouterError::UnknownCapability(_)));
    }
}
