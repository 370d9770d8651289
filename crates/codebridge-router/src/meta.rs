//! Discovery operations. Read the registry's descriptors only; never invoke.

use serde_json::{json, Value};

use crate::registry::CapabilityRegistry;
use crate::{Result, RouterError};

const DEFAULT_SEARCH_LIMIT: usize = 20;

pub fn handle(registry: &CapabilityRegistry, op: &str, input: &Value) -> Result<Value> {
    match op {
        "list_capabilities" => Ok(json!(registry.list())),
        "describe_capability" => {
            let name = required_str(input, "name")?;
            let descriptor = registry
                .describe(name)
                .ok_or_else(|| RouterError::UnknownCapability(name.to_string()))?;
            Ok(json!(descriptor))
        }
        "search_capabilities" => {
            let query = required_str(input, "query")?.to_lowercase();
            let limit = input
                .get("limit")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_SEARCH_LIMIT);
            let hits: Vec<&_> = registry
                .descriptors()
                .filter(|d| {
                    d.name.to_lowercase().contains(&query)
                        || d.description.to_lowercase().contains(&query)
                })
                .take(limit)
                .collect();
            Ok(json!(hits))
        }
        other => Err(RouterError::UnknownCapability(other.to_string())),
    }
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input.get(key).and_then(Value::as_str).ok_or_else(|| {
        RouterError::MalformedToolInvocation(format!("'{}' (string) is required", key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::echo;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builder()
            .register(echo("crm.lookup_contact"))
            .unwrap()
            .register(echo("crm.update_contact"))
            .unwrap()
            .register(echo("billing.charge"))
            .unwrap()
            .build()
    }

    #[test]
    fn test_list_and_describe() {
        let reg = registry();
        assert_eq!(
            handle(&reg, "list_capabilities", &Value::Null).unwrap(),
            json!(["billing.charge", "crm.lookup_contact", "crm.update_contact"])
        );
        let d = handle(&reg, "describe_capability", &json!({"name": "billing.charge"})).unwrap();
        assert_eq!(d["name"], "billing.charge");
        assert!(d.get("inputSchema").is_some());

        assert!(matches!(
            handle(&reg, "describe_capability", &json!({})),
            Err(RouterError::MalformedToolInvocation(_))
        ));
        assert!(matches!(
            handle(&reg, "describe_capability", &json!({"name": "nope"})),
            Err(RouterError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_search_case_insensitive_with_limit() {
        let reg = registry();
        let hits = handle(&reg, "search_capabilities", &json!({"query": "CONTACT"})).unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 2);
        let hits = handle(
            &reg,
            "search_capabilities",
            &json!({"query": "echo", "limit": 1}),
        )
        .unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 1);
    }
}
