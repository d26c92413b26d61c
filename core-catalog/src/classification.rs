//! Classification drilling.
//!
//! Marketplace payloads carry browse classifications as a tree:
//!
//! ```json
//! { "classifications": [
//!     { "id": "1", "name": "Shoes", "children": [
//!         { "id": "12", "name": "Running", "children": [] } ] } ] }
//! ```
//!
//! Leaf paths are collected with an explicit work stack. Node ids already
//! seen are skipped and nodes below the depth limit are not expanded, so a
//! malformed or self-referencing tree terminates.

use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

pub const CLASSIFICATIONS_KEY: &str = "classifications";
pub const DEFAULT_MAX_DEPTH: usize = 12;
pub const PATH_SEPARATOR: &str = " > ";

struct Frame<'a> {
    node: &'a Value,
    path: Vec<String>,
}

fn node_name(node: &Value) -> Option<&str> {
    node.get("name")
        .or_else(|| node.get("displayName"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

fn node_id(node: &Value) -> Option<String> {
    match node.get("id").or_else(|| node.get("classificationId"))? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn node_children(node: &Value) -> &[Value] {
    node.get("children")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// All root-to-leaf name paths under `payload["classifications"]`.
pub fn leaf_paths(payload: &Value, max_depth: usize) -> Vec<Vec<String>> {
    let roots = match payload.get(CLASSIFICATIONS_KEY).and_then(Value::as_array) {
        Some(roots) => roots,
        None => return Vec::new(),
    };

    let mut leaves = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<Frame<'_>> = roots
        .iter()
        .rev()
        .map(|node| Frame {
            node,
            path: Vec::new(),
        })
        .collect();

    while let Some(Frame { node, mut path }) = stack.pop() {
        if let Some(id) = node_id(node) {
            if !visited.insert(id.clone()) {
                debug!(classification_id = %id, "Skipping repeated classification node");
                continue;
            }
        }

        let Some(name) = node_name(node) else {
            continue;
        };
        path.push(name.to_string());

        let children = node_children(node);
        if children.is_empty() || path.len() >= max_depth {
            leaves.push(path);
            continue;
        }

        for child in children.iter().rev() {
            stack.push(Frame {
                node: child,
                path: path.clone(),
            });
        }
    }

    leaves
}

/// The deepest leaf path, joined with `" > "`. Ties keep the first path.
pub fn deepest_category(payload: &Value, max_depth: usize) -> Option<String> {
    leaf_paths(payload, max_depth)
        .into_iter()
        .fold(None::<Vec<String>>, |best, path| match best {
            Some(best) if best.len() >= path.len() => Some(best),
            _ => Some(path),
        })
        .map(|path| path.join(PATH_SEPARATOR))
}
