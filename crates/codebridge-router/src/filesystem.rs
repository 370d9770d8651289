//! Read-only virtual filesystem over the registry.
//!
//! ```text
//! /servers/<category>/<operation>.json
//! ```
//! Each file is the capability's descriptor. No side effects.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::registry::CapabilityRegistry;
use crate::{Result, RouterError};

const ROOT_DIR: &str = "servers";

pub fn handle(registry: &CapabilityRegistry, op: &str, input: &Value) -> Result<Value> {
    match op {
        "fs_list" => list(registry, input_path(input)?),
        "fs_read" => {
            let path = input.get("path").and_then(Value::as_str).ok_or_else(|| {
                RouterError::MalformedToolInvocation("'path' (string) is required".to_string())
            })?;
            read(registry, path)
        }
        "fs_tree" => Ok(tree(registry)),
        other => Err(RouterError::UnknownCapability(other.to_string())),
    }
}

fn input_path(input: &Value) -> Result<&str> {
    match input.get("path") {
        None | Some(Value::Null) => Ok("/"),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(RouterError::MalformedToolInvocation(
            "'path' must be a string".to_string(),
        )),
    }
}

/// Absolute path → components. `.` is dropped; `..` is rejected.
fn components(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(RouterError::MalformedToolInvocation(format!(
            "path must be absolute: {}",
            path
        )));
    }
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(RouterError::MalformedToolInvocation(format!(
                    "'..' is not allowed: {}",
                    path
                )))
            }
            p => parts.push(p),
        }
    }
    Ok(parts)
}

fn no_such_path(path: &str) -> RouterError {
    RouterError::MalformedToolInvocation(format!("no such path: {}", path))
}

/// category → sorted file names
fn layout(registry: &CapabilityRegistry) -> BTreeMap<String, Vec<String>> {
    let mut dirs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for d in registry.descriptors() {
        dirs.entry(d.category().to_string())
            .or_default()
            .push(format!("{}.json", d.operation()));
    }
    for files in dirs.values_mut() {
        files.sort();
    }
    dirs
}

fn entry(name: &str, kind: &str) -> Value {
    json!({ "name": name, "type": kind })
}

fn list(registry: &CapabilityRegistry, path: &str) -> Result<Value> {
    let parts = components(path)?;
    let dirs = layout(registry);
    let entries: Vec<Value> = match parts.as_slice() {
        [] => vec![entry(ROOT_DIR, "directory")],
        [root] if *root == ROOT_DIR => dirs.keys().map(|c| entry(c, "directory")).collect(),
        [root, category] if *root == ROOT_DIR => dirs
            .get(*category)
            .ok_or_else(|| no_such_path(path))?
            .iter()
            .map(|f| entry(f, "file"))
            .collect(),
        _ => return Err(no_such_path(path)),
    };
    Ok(json!({ "path": path, "entries": entries }))
}

fn read(registry: &CapabilityRegistry, path: &str) -> Result<Value> {
    let parts = components(path)?;
    let [root, category, file] = parts.as_slice() else {
        return Err(no_such_path(path));
    };
    if *root != ROOT_DIR {
        return Err(no_such_path(path));
    }
    let operation = file.strip_suffix(".json").ok_or_else(|| no_such_path(path))?;
    registry
        .descriptors()
        .find(|d| d.category() == *category && d.operation() == operation)
        .map(|d| json!(d))
        .ok_or_else(|| no_such_path(path))
}

fn tree(registry: &CapabilityRegistry) -> Value {
    let mut root = serde_json::Map::new();
    root.insert(ROOT_DIR.to_string(), json!(layout(registry)));
    Value::Object(root)
}
