//! Orchestrator → host backend → bridge → router → capability, end to end.
//!
//! Needs python3 (and node for the Node test) on PATH; skips otherwise.

use std::sync::{Arc, Mutex};

use codebridge::{Orchestrator, OrchestratorConfig};
use codebridge_core::RunStatus;
use codebridge_router::{CapabilityDescriptor, CapabilityRegistry, FnCapability};
use codebridge_sandbox::{HostBackend, Language, RuntimeResolver, SystemRuntimeResolver};
use serde_json::{json, Value};

fn python_available() -> bool {
    let found = SystemRuntimeResolver::new()
        .resolve(Language::Python)
        .is_some();
    if !found {
        eprintln!("python3 not found, skipping");
    }
    found
}

fn node_available() -> bool {
    let found = SystemRuntimeResolver::new().resolve(Language::Node).is_some();
    if !found {
        eprintln!("node not found, skipping");
    }
    found
}

/// `crm.lookup_contact` returns a contact with an email address;
/// `crm.send_note` records what it received.
fn crm_registry(received: Arc<Mutex<Vec<Value>>>) -> CapabilityRegistry {
    let lookup = FnCapability::new(
        CapabilityDescriptor::new(
            "crm.lookup_contact",
            "Look up a contact by name",
            json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
        ),
        |input: Value| async move {
            let name = input["name"].as_str().unwrap_or_default().to_string();
            Ok::<_, anyhow::Error>(json!({"name": name, "email": "alice@example.com"}))
        },
    );
    let send = FnCapability::new(
        CapabilityDescriptor::new(
            "crm.send_note",
            "Send a note to an email address",
            json!({"type": "object", "required": ["to"], "properties": {"to": {"type": "string"}}}),
        ),
        move |input: Value| {
            let received = Arc::clone(&received);
            async move {
                received.lock().unwrap().push(input.clone());
                Ok::<_, anyhow::Error>(json!({"delivered_to": input["to"]}))
            }
        },
    );
    CapabilityRegistry::builder()
        .register(lookup)
        .unwrap()
        .register(send)
        .unwrap()
        .build()
}

fn start(root: &std::path::Path, registry: CapabilityRegistry, timeout_secs: u64) -> Orchestrator {
    let mut config = OrchestratorConfig::rooted_at(root);
    config.limits.timeout_secs = timeout_secs;
    Orchestrator::start_with_backend(config, registry, Arc::new(HostBackend)).unwrap()
}

const AGENT_CODE: &str = r#"
names = listCapabilities()
contact = invokeCapability("crm.lookup_contact", {"name": "Alice"})
print("got", contact["email"])
sent = invokeCapability("crm.send_note", {"to": contact["email"], "body": "hello"})
try:
    invokeCapability("does_not_exist", {})
    missing = None
except RuntimeError as e:
    missing = str(e)
return {"names": names, "contact": contact, "sent": sent, "missing": missing}
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_agent_sees_tokens_capability_sees_values() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let orch = start(root.path(), crm_registry(Arc::clone(&received)), 30);

    let result = orch
        .execute("alice", Some(AGENT_CODE), Some(Language::Python))
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed, "{:?}", result);
    let output = result.output.clone().unwrap();

    assert_eq!(output["names"], json!(["crm.lookup_contact", "crm.send_note"]));
    assert_eq!(output["contact"]["email"], "[EMAIL_1]");
    assert_eq!(output["sent"]["delivered_to"], "[EMAIL_1]");
    assert!(output["missing"]
        .as_str()
        .unwrap()
        .starts_with("UnknownCapability"));
    assert!(result.logs.iter().any(|l| l == "got [EMAIL_1]"));
    assert!(!serde_json::to_string(&result).unwrap().contains("alice@example.com"));

    // The capability got the real address back.
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["to"], "alice@example.com");

    let stats = orch.router().stats();
    let missing = stats.get("does_not_exist").unwrap();
    assert_eq!((missing.successes, missing.failures), (0, 1));
    assert_eq!(stats.get("crm.send_note").unwrap().successes, 1);

    assert_eq!(orch.sessions().active_count(), 0);
    assert_eq!(orch.privacy().open_sessions(), 0);
    assert_eq!(orch.engine().active_isolations(), 0);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_tears_everything_down() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let orch = start(root.path(), CapabilityRegistry::builder().build(), 1);

    let result = orch
        .execute("bob", Some("import time\ntime.sleep(30)"), None)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::TimedOut);
    assert_eq!(result.error_class(), Some("IsolationTimeout"));

    assert_eq!(orch.sessions().active_count(), 0);
    assert_eq!(orch.engine().active_isolations(), 0);
    let workspaces = root.path().join("run").join("workspaces");
    let leftover = std::fs::read_dir(&workspaces)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
    // The skills dir is persistent.
    assert!(root.path().join("skills").join("bob").is_dir());
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_text_is_tokenized() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let orch = start(root.path(), CapabilityRegistry::builder().build(), 30);

    let result = orch
        .execute("carol", Some("raise ValueError('cannot reach carol@example.org')"), None)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Crashed);
    assert_eq!(
        result.error.as_deref(),
        Some("RuntimeException: ValueError: cannot reach [EMAIL_1]")
    );
    assert!(result.logs.iter().all(|l| !l.contains("carol@example.org")));
    orch.shutdown().await;
}

/// `crm.contact_by_index` maps index `i` to `user{i % 4}@corp.io`.
fn indexed_registry() -> CapabilityRegistry {
    let by_index = FnCapability::new(
        CapabilityDescriptor::new(
            "crm.contact_by_index",
            "Contact for a numeric index",
            json!({"type": "object", "required": ["index"], "properties": {"index": {"type": "integer"}}}),
        ),
        |input: Value| async move {
            let i = input["index"].as_u64().unwrap_or_default();
            Ok::<_, anyhow::Error>(json!({"email": format!("user{}@corp.io", i % 4)}))
        },
    );
    CapabilityRegistry::builder()
        .register(by_index)
        .unwrap()
        .build()
}

const NODE_AGENT_CODE: &str = r#"
const contacts = await Promise.all(
  [0, 1, 2, 3, 4, 5, 6, 7].map((index) => invokeCapability('crm.contact_by_index', { index }))
);
let missing = null;
try {
  await invokeCapability('does_not_exist', {});
} catch (e) {
  missing = e.message;
}
console.log('first is ' + contacts[0].email);
return { emails: contacts.map((c) => c.email), missing, names: await listCapabilities() };
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_node_concurrent_calls_share_tokens() {
    if !node_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let orch = start(root.path(), indexed_registry(), 30);

    let result = orch
        .execute("dana", Some(NODE_AGENT_CODE), Some(Language::Node))
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed, "{:?}", result);
    let output = result.output.clone().unwrap();

    let emails: Vec<&str> = output["emails"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e.as_str().unwrap())
        .collect();
    assert_eq!(emails.len(), 8);
    for i in 0..4 {
        assert_eq!(emails[i], emails[i + 4]);
    }
    let mut distinct = emails.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct, ["[EMAIL_1]", "[EMAIL_2]", "[EMAIL_3]", "[EMAIL_4]"]);

    assert!(output["missing"]
        .as_str()
        .unwrap()
        .starts_with("UnknownCapability"));
    assert_eq!(output["names"], json!(["crm.contact_by_index"]));
    assert!(result.logs.iter().any(|l| l.starts_with("first is [EMAIL_")));
    assert!(!serde_json::to_string(&result).unwrap().contains("@corp.io"));

    assert_eq!(orch.router().stats().get("crm.contact_by_index").unwrap().successes, 8);
    assert_eq!(orch.sessions().active_count(), 0);
    assert_eq!(orch.engine().active_isolations(), 0);
    orch.shutdown().await;
}
