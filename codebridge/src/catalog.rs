//! YAML capability catalog.
//!
//! ```yaml
//! capabilities:
//!   - name: crm.lookup_contact
//!     description: Look up a contact by email
//!     inputSchema:
//!       type: object
//!       required: [email]
//!       properties:
//!         email: { type: string }
//!     command: ["python3", "/opt/tools/crm_lookup.py"]
//!     timeoutSecs: 20
//! ```
//!
//! Every entry becomes a [`CommandCapability`]: the host command receives the
//! detokenized input as JSON on stdin and must print one JSON value on stdout.
//! The catalog is read once at startup.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use codebridge_router::{Capability, CapabilityDescriptor, CapabilityRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// stderr kept in a failure message.
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_input_schema() -> Value {
    json!({ "type": "object" })
}

fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    capabilities: Vec<CatalogEntry>,
}

pub fn parse_catalog(yaml: &str) -> Result<Vec<CatalogEntry>> {
    let file: CatalogFile =
        serde_yaml::from_str(yaml).with_context(|| "Failed to parse capability catalog")?;
    Ok(file.capabilities)
}

pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capability catalog {}", path.display()))?;
    parse_catalog(&yaml).with_context(|| format!("in {}", path.display()))
}

/// Registry for `path`, or an empty registry when no catalog is configured.
pub fn registry_from_catalog(path: Option<&Path>) -> Result<CapabilityRegistry> {
    let mut builder = CapabilityRegistry::builder();
    if let Some(path) = path {
        for entry in load_catalog(path)? {
            let capability = CommandCapability::from_entry(entry)?;
            builder.insert(Arc::new(capability))?;
        }
    }
    let registry = builder.build();
    tracing::info!("{} capabilities registered", registry.len());
    Ok(registry)
}

/// A capability backed by a host command.
#[derive(Debug)]
pub struct CommandCapability {
    descriptor: CapabilityDescriptor,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapability {
    pub fn from_entry(entry: CatalogEntry) -> Result<Self> {
        let mut command = entry.command.into_iter();
        let Some(program) = command.next().filter(|p| !p.trim().is_empty()) else {
            bail!("capability {} has an empty command", entry.name);
        };
        Ok(Self {
            descriptor: CapabilityDescriptor::new(entry.name, entry.description, entry.input_schema),
            program,
            args: command.collect(),
            timeout: Duration::from_secs(entry.timeout_secs.max(1)),
        })
    }
}

#[async_trait]
impl Capability for CommandCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        let payload = serde_json::to_vec(&input)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start `{}`", self.program))?;

        let mut stdin = child.stdin.take().context("command stdin unavailable")?;
        let feed = async move {
            // A command may exit without reading its input.
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!("capability stdin closed: {}", e);
            }
            let _ = stdin.shutdown().await;
        };
        let run = async {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("failed to wait for `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            bail!("`{}` exited with {}: {}", self.program, output.status, stderr);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout).with_context(|| "capability output is not valid JSON")
    }
}
