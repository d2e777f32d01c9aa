//! Sandbox configuration and its sanity bounds.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Lowest accepted wall-clock timeout.
pub const MIN_TIMEOUT_MS: u64 = 1_000;

/// Lowest accepted memory budget (1 MiB).
pub const MIN_MEMORY_BYTES: usize = 1024 * 1024;

/// Names handed to components as capabilities.
const DEFAULT_ALLOWED_APIS: &[&str] = &[
    "React",
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useMemo",
    "useCallback",
    "useRef",
    "useReducer",
    "useContext",
    "useId",
];

/// Names that must not resolve to anything while a component runs.
const DEFAULT_BLOCKED_APIS: &[&str] = &[
    "eval",
    "Function",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "requestAnimationFrame",
    "queueMicrotask",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "EventSource",
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "document",
    "window",
    "navigator",
    "location",
    "globalThis",
    "self",
    "importScripts",
    "postMessage",
    "process",
    "require",
    "module",
    "Deno",
];

/// Configuration for one `ComponentSandbox`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    /// Wall-clock budget for one execution in milliseconds.
    pub timeout_ms: u64,
    /// Heap budget in bytes for the isolate.
    pub memory_limit_bytes: usize,
    pub allowed_apis: Vec<String>,
    pub blocked_apis: Vec<String>,
    /// Capture `console.*` from components; when false, console calls are no-ops.
    pub enable_console: bool,
    /// Accepted for compatibility. The isolate has no network stack, so this
    /// never grants access.
    pub enable_network: bool,
    /// Boot a new isolate for every execution after the first, so nothing a
    /// component leaves on the heap is visible to the next one.
    pub fresh_isolate: bool,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_limit_bytes: 50 * 1024 * 1024, // 50MB
            allowed_apis: DEFAULT_ALLOWED_APIS.iter().map(|s| s.to_string()).collect(),
            blocked_apis: DEFAULT_BLOCKED_APIS.iter().map(|s| s.to_string()).collect(),
            enable_console: true,
            enable_network: false,
            fresh_isolate: true,
        }
    }
}

impl SandboxOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load options from a TOML file; absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

/// Result of `validate_sandbox_options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub fn validate_sandbox_options(options: &SandboxOptions) -> OptionsValidation {
    let mut errors = Vec::new();

    if options.timeout_ms < MIN_TIMEOUT_MS {
        errors.push(format!(
            "Timeout must be at least {MIN_TIMEOUT_MS}ms (got {}ms)",
            options.timeout_ms
        ));
    }

    if options.memory_limit_bytes < MIN_MEMORY_BYTES {
        errors.push(format!(
            "Memory limit must be at least 1MB ({MIN_MEMORY_BYTES} bytes, got {})",
            options.memory_limit_bytes
        ));
    }

    for name in &options.allowed_apis {
        if options.blocked_apis.contains(name) {
            errors.push(format!("API '{name}' cannot be both allowed and blocked"));
        }
    }

    OptionsValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}
