//! Sanitize props and context values before they cross into the isolate.
//!
//! Rejects keys like `__proto__`, `constructor`, and `prototype` that could be
//! used to pollute prototypes inside component code, and bounds nesting depth.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

/// Maximum recursion depth for nested objects/arrays
const MAX_DEPTH: usize = 32;

/// Keys that could be used for prototype pollution
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Sanitize a props map, erroring if a dangerous key appears at any depth.
///
/// # Errors
/// Returns an error if:
/// - A dangerous key (`__proto__`, `constructor`, `prototype`) is found
/// - Nesting depth exceeds MAX_DEPTH (32)
pub fn sanitize_props(props: Map<String, Value>) -> Result<Map<String, Value>> {
    sanitize_map(props, 0)
}

fn sanitize_map(map: Map<String, Value>, depth: usize) -> Result<Map<String, Value>> {
    if depth > MAX_DEPTH {
        return Err(anyhow!(
            "nesting too deep (max {} levels)",
            MAX_DEPTH
        ));
    }

    if let Some(key) = map.keys().find(|key| DANGEROUS_KEYS.contains(&key.as_str())) {
        return Err(anyhow!(
            "'{}' key is forbidden (prototype pollution)",
            key
        ));
    }

    let mut sanitized = Map::new();
    for (key, val) in map {
        sanitized.insert(key, sanitize_value(val, depth + 1)?);
    }
    Ok(sanitized)
}

fn sanitize_value(value: Value, depth: usize) -> Result<Value> {
    match value {
        Value::Object(map) => Ok(Value::Object(sanitize_map(map, depth)?)),
        Value::Array(arr) => {
            if depth > MAX_DEPTH {
                return Err(anyhow!("nesting too deep (max {} levels)", MAX_DEPTH));
            }
            let sanitized: Result<Vec<Value>> = arr
                .into_iter()
                .map(|v| sanitize_value(v, depth + 1))
                .collect();
            Ok(Value::Array(sanitized?))
        }
        // Primitives are safe
        other => Ok(other),
    }
}
