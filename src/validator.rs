//! Static vetting of component source text.
//!
//! Every check runs on every call and appends to the same diagnostic lists,
//! so authors see the full picture instead of the first failure.
//!
//! The security scan here is textual: it cannot see through renamed bindings,
//! computed member access or string encoding. The isolate in `runtime.rs` is
//! the actual boundary; this scan only gives authors early feedback.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Component, PropSchema, ANY_PROP_TYPE};

/// Maximum source size in bytes (10 KiB).
pub const MAX_CODE_LENGTH: usize = 10 * 1024;

/// Maximum number of source lines.
pub const MAX_LINES: usize = 200;

/// Prop count above which a grouping warning is emitted.
pub const MAX_PROPS: usize = 20;

/// Case-folded substrings that reference host capabilities, with the API name
/// reported to the author.
const RESTRICTED_APIS: &[(&str, &str)] = &[
    ("eval(", "eval"),
    ("new function(", "Function"),
    ("settimeout", "setTimeout"),
    ("setinterval", "setInterval"),
    ("requestanimationframe", "requestAnimationFrame"),
    ("fetch(", "fetch"),
    ("xmlhttprequest", "XMLHttpRequest"),
    ("websocket", "WebSocket"),
    ("eventsource", "EventSource"),
    ("sendbeacon", "navigator.sendBeacon"),
    ("localstorage", "localStorage"),
    ("sessionstorage", "sessionStorage"),
    ("indexeddb", "indexedDB"),
    ("document.cookie", "document.cookie"),
    ("document.write", "document.write"),
    ("window.location", "window.location"),
    ("window.open", "window.open"),
    ("globalthis", "globalThis"),
    ("postmessage", "postMessage"),
    ("importscripts", "importScripts"),
    ("process.", "process"),
    ("child_process", "child_process"),
    ("module.exports", "module.exports"),
    ("__dirname", "__dirname"),
    ("deno.", "Deno"),
    ("__proto__", "__proto__"),
    ("import(", "import()"),
];

static DANGEROUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\beval\s*\(", "dynamic code evaluation via eval()"),
        (r"\bnew\s+Function\s*\(", "dynamic code construction via Function()"),
        (r"\b(?:setTimeout|setInterval)\s*\(", "timer scheduling"),
        (r"\bfetch\s*\(", "network access via fetch()"),
        (r"\b(?:window|globalThis|self)\s*\[", "computed access on a global object"),
        (
            r#"\[\s*['"`](?:constructor|__proto__|prototype)['"`]\s*\]"#,
            "computed access to constructor or prototype",
        ),
        (r"\.constructor\s*\(", "call through .constructor"),
        (r"\bimport\s*\(", "dynamic import()"),
    ]
    .into_iter()
    .map(|(pattern, label)| (compile(pattern), label))
    .collect()
});

const HTML_INJECTION_SINKS: &[&str] = &[
    "dangerouslySetInnerHTML",
    "innerHTML",
    "outerHTML",
    "insertAdjacentHTML",
];

/// Known-safe modules and framework hook names.
pub const ALLOWED_DEPENDENCIES: &[&str] = &[
    "react",
    "react-dom",
    "lucide-react",
    "framer-motion",
    "recharts",
    "date-fns",
    "clsx",
    "classnames",
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

static DEFAULT_EXPORT_RE: Lazy<Regex> = Lazy::new(|| compile(r"\bexport\s+default\b"));
static EXPORT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\bexport\s+default\s+(?:async\s+)?(?:function\s*\*?\s*|class\s+)?([A-Za-z_$][\w$]*)")
});
static REACT_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?:\bimport\s+[^;]*?\bfrom\s+['"]react['"]|\brequire\s*\(\s*['"]react['"]\s*\))"#)
});
static RETURN_MARKUP_RE: Lazy<Regex> = Lazy::new(|| compile(r"\breturn\s*\(?\s*<"));

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"\bimport\s+(?:[\w$*\s{},]+?\s+from\s+)?['"]([^'"\n]+)['"]"#)
});
static REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#));

static DESTRUCTURE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(?:const|let|var)\s*\{([^}]*)\}\s*=\s*(?:this\.)?props\b",
        r"\bfunction\s*(?:[A-Z][\w$]*)?\s*\(\s*\{([^}]*)\}",
        r"\b[A-Z][\w$]*\s*=\s*\(\s*\{([^}]*)\}\s*\)\s*=>",
    ]
    .into_iter()
    .map(compile)
    .collect()
});
static PROP_ACCESS_RE: Lazy<Regex> = Lazy::new(|| compile(r"\bprops\.([A-Za-z_$][\w$]*)"));
static IDENT_RE: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z_$][\w$]*$"));
static CAMEL_CASE_RE: Lazy<Regex> = Lazy::new(|| compile(r"^[a-z][a-zA-Z0-9]*$"));

static JSON_CLONE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"JSON\.parse\s*\(\s*JSON\.stringify\s*\("));
static JSON_CALL_RE: Lazy<Regex> = Lazy::new(|| compile(r"JSON\.(?:parse|stringify)\s*\("));
static ITERATION_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\.(?:map|filter|reduce|forEach|some|every|find)\s*\("));
static INFINITE_LOOP_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\bwhile\s*\(\s*(?:true|1)\s*\)|\bfor\s*\(\s*;\s*;\s*\)")
});

fn compile(pattern: &str) -> Regex {
    // Patterns are compile-time constants covered by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid validator pattern {pattern}: {e}"))
}

/// Outcome of vetting one component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub dependencies: Vec<String>,
    pub props: PropSchema,
}

#[derive(Default)]
struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Diagnostics {
    fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

/// Validate a component's source text.
pub fn validate(component: &Component) -> ValidationResult {
    let code = component.code.as_str();
    let mut diagnostics = Diagnostics::default();

    let dependencies = extract_dependencies(code);
    let props = extract_props(code);

    check_structure(code, &mut diagnostics);
    check_security(code, &mut diagnostics);
    check_react_patterns(code, &mut diagnostics);
    check_dependencies(&dependencies, &mut diagnostics);
    check_props(component, &props, &mut diagnostics);
    check_syntax(code, &mut diagnostics);
    check_performance(code, &mut diagnostics);

    let is_valid = diagnostics.errors.is_empty();
    debug!(
        component = %component.name,
        is_valid,
        errors = diagnostics.errors.len(),
        warnings = diagnostics.warnings.len(),
        "Component validated"
    );

    ValidationResult {
        is_valid,
        errors: diagnostics.errors,
        warnings: diagnostics.warnings,
        dependencies,
        props,
    }
}

fn check_structure(code: &str, diagnostics: &mut Diagnostics) {
    match DEFAULT_EXPORT_RE.find_iter(code).count() {
        0 => diagnostics.error("Component must have a default export"),
        1 => {}
        n => diagnostics.error(format!(
            "Component must have exactly one default export (found {n})"
        )),
    }

    if code.len() > MAX_CODE_LENGTH {
        diagnostics.error(format!(
            "Component code is too long ({} bytes, max {MAX_CODE_LENGTH})",
            code.len()
        ));
    }

    let lines = code.lines().count();
    if lines > MAX_LINES {
        diagnostics.error(format!(
            "Component has too many lines ({lines}, max {MAX_LINES})"
        ));
    }
}

fn check_security(code: &str, diagnostics: &mut Diagnostics) {
    let folded = code.to_lowercase();
    for (needle, api) in RESTRICTED_APIS {
        if folded.contains(needle) {
            diagnostics.error(format!("Restricted API detected: {api}"));
        }
    }

    for (pattern, label) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(code) {
            diagnostics.error(format!("Dangerous pattern detected: {label}"));
        }
    }

    for sink in HTML_INJECTION_SINKS {
        if code.contains(sink) {
            diagnostics.warn(format!(
                "Raw HTML injection via {sink}; make sure the content is sanitized"
            ));
        }
    }
}

fn check_react_patterns(code: &str, diagnostics: &mut Diagnostics) {
    if !REACT_IMPORT_RE.is_match(code) {
        diagnostics.warn("React import not found; React and hooks are provided by the sandbox");
    }

    if DEFAULT_EXPORT_RE.is_match(code) {
        match exported_component_name(code) {
            Some(name) if !name.starts_with(|c: char| c.is_ascii_uppercase()) => {
                diagnostics.error(format!(
                    "Component name '{name}' must start with a capital letter"
                ));
            }
            Some(_) => {}
            None => diagnostics.error("Default export must be a named component"),
        }
    }

    if !RETURN_MARKUP_RE.is_match(code) {
        diagnostics.error("Component must return JSX markup");
    }
}

fn check_dependencies(dependencies: &[String], diagnostics: &mut Diagnostics) {
    for dependency in dependencies {
        if !ALLOWED_DEPENDENCIES.contains(&dependency.as_str()) {
            diagnostics.warn(format!(
                "Dependency '{dependency}' is not in the list of known safe libraries"
            ));
        }
    }
}

fn check_props(component: &Component, props: &PropSchema, diagnostics: &mut Diagnostics) {
    for name in props.keys() {
        if !CAMEL_CASE_RE.is_match(name) {
            diagnostics.error(format!("Prop '{name}' must be camelCase"));
        }
    }

    if props.len() > MAX_PROPS {
        diagnostics.warn(format!(
            "Component uses {} props; consider grouping related props into objects",
            props.len()
        ));
    }

    for key in component.default_props.keys() {
        if !props.contains_key(key) {
            diagnostics.warn(format!(
                "Default prop '{key}' is not referenced by the component"
            ));
        }
    }
}

fn check_syntax(code: &str, diagnostics: &mut Diagnostics) {
    for (open, close, label) in [
        ('(', ')', "parentheses ()"),
        ('{', '}', "curly braces {}"),
        ('[', ']', "square brackets []"),
    ] {
        let mut depth = 0i64;
        let mut closed_early = false;
        for c in code.chars() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                closed_early |= depth < 0;
            }
        }

        if depth != 0 {
            diagnostics.error(format!("Syntax error: unbalanced {label}"));
        } else if closed_early {
            diagnostics.error(format!("Syntax error: '{close}' before a matching '{open}'"));
        }
    }

    if code.contains('<') && !code.contains('>') {
        diagnostics.error("Syntax error: '<' without a matching '>'");
    }
}

fn check_performance(code: &str, diagnostics: &mut Diagnostics) {
    if JSON_CLONE_RE.is_match(code) {
        diagnostics.warn("Deep cloning with JSON.parse(JSON.stringify(...)) is expensive");
    } else if JSON_CALL_RE.find_iter(code).count() > 2 {
        diagnostics.warn("Repeated JSON serialization detected; consider memoizing the result");
    }

    let passes = ITERATION_RE.find_iter(code).count();
    if passes > 3 {
        diagnostics.warn(format!(
            "{passes} array iteration passes detected; consider combining them"
        ));
    }

    if INFINITE_LOOP_RE.is_match(code) {
        diagnostics.error("Potential infinite loop detected");
    }
}

/// Name bound by the default export, if it is a plain identifier.
pub fn exported_component_name(code: &str) -> Option<String> {
    let name = EXPORT_NAME_RE.captures(code)?.get(1)?.as_str();
    match name {
        "function" | "class" | "async" => None,
        _ => Some(name.to_string()),
    }
}

/// Module specifiers from import and require statements, deduplicated in
/// first-occurrence order.
pub fn extract_dependencies(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = IMPORT_RE
        .captures_iter(code)
        .chain(REQUIRE_RE.captures_iter(code))
        .filter_map(|caps| caps.get(1))
        .map(|m| (m.start(), m.as_str()))
        .collect();
    found.sort_by_key(|(position, _)| *position);

    let mut dependencies: Vec<String> = Vec::new();
    for (_, specifier) in found {
        if !dependencies.iter().any(|d| d == specifier) {
            dependencies.push(specifier.to_string());
        }
    }
    dependencies
}

/// Prop names from destructuring and `props.x` access, first occurrence wins.
pub fn extract_props(code: &str) -> PropSchema {
    let mut found: Vec<(usize, String)> = Vec::new();

    for pattern in DESTRUCTURE_RES.iter() {
        for caps in pattern.captures_iter(code) {
            let Some(group) = caps.get(1) else { continue };
            let mut offset = group.start();
            for entry in group.as_str().split(',') {
                if let Some(name) = destructured_name(entry) {
                    found.push((offset, name.to_string()));
                }
                offset += entry.len() + 1;
            }
        }
    }

    for caps in PROP_ACCESS_RE.captures_iter(code) {
        if let Some(name) = caps.get(1) {
            found.push((name.start(), name.as_str().to_string()));
        }
    }

    found.sort_by_key(|(position, _)| *position);

    let mut schema = PropSchema::new();
    for (_, name) in found {
        schema
            .entry(name)
            .or_insert_with(|| ANY_PROP_TYPE.to_string());
    }
    schema
}

/// `label = 'x'` -> `label`, `value: alias` -> `value`, `...rest` -> none.
fn destructured_name(entry: &str) -> Option<&str> {
    let entry = entry.trim();
    if entry.is_empty() || entry.starts_with("...") {
        return None;
    }
    let name = entry
        .split(|c| c == '=' || c == ':')
        .next()
        .unwrap_or_default()
        .trim();
    IDENT_RE.is_match(name).then_some(name)
}
