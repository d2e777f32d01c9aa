//! Turns validated component source into a factory the isolate can compile.
//!
//! The factory takes the capability bundle and a module resolver as its only
//! inputs. Blocked names are shadowed by extra parameters that are never
//! passed, so they resolve to `undefined` inside the unit. The host compiles
//! `body` as a function body, so the source can never close the factory and
//! run code outside it.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::jsx;
use crate::validator::exported_component_name;

/// Names the factory prologue binds from the capability bundle.
const PROLOGUE_BINDINGS: &[&str] = &["React", "h", "Fragment", "useSandboxContext"];

const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import",
    "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "var", "void", "while", "with", "yield", "let", "static", "await",
];

static IMPORT_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?m)^[ \t]*import\s+([\w$*\s{},]+?)\s+from\s+['"]([^'"\n]+)['"][ \t]*;?"#)
});
static IMPORT_BARE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?m)^[ \t]*import\s+['"]([^'"\n]+)['"][ \t]*;?"#));
static REQUIRE_CALL_RE: Lazy<Regex> = Lazy::new(|| compile(r"\brequire\s*\("));
static EXPORT_DEFAULT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?m)^[ \t]*export\s+default\s+([A-Za-z_$][\w$]*)[ \t]*;?[ \t]*$")
});
static EXPORT_DEFAULT_DECL_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\bexport\s+default\s+((?:async\s+)?function\b|class\b)"));
static EXPORT_DEFAULT_EXPR_RE: Lazy<Regex> = Lazy::new(|| compile(r"\bexport\s+default\s+"));
static EXPORT_LIST_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^[ \t]*export\s*\{[^}]*\}[ \t]*;?"));
static EXPORT_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\bexport\s+((?:async\s+)?function\b|class\b|const\b|let\b|var\b)")
});
static IDENT_RE: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z_$][\w$]*$"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid transform pattern {pattern}: {e}"))
}

/// Identifier the default export is rebound to when it is an expression.
pub const DEFAULT_BINDING: &str = "__default";

/// Surface form the component entry point was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentShape {
    /// `function Name(props) { ... }`
    Function,
    /// `const Name = (props) => ...`
    Arrow,
    /// `class Name extends React.Component { ... }`
    Class,
    /// A named binding of some other form, e.g. `memo(Inner)`.
    Binding,
    /// `export default <expression>`.
    Expression,
    /// No default export; the whole source is used as a function body.
    Anonymous,
}

/// A factory ready for compilation inside the isolate.
#[derive(Debug, Clone)]
pub struct TransformedUnit {
    pub name: String,
    pub shape: ComponentShape,
    /// Factory parameter names: capabilities, resolver, then shadowed names.
    pub params: Vec<String>,
    /// Factory body; returns the component.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transform: {0}")]
pub struct TransformError(pub String);

/// Build the factory for `code`.
///
/// `allowed` names are destructured from the React facade; `blocked` names
/// that are plain identifiers become shadowing parameters.
pub fn transform(
    code: &str,
    allowed: &[String],
    blocked: &[String],
) -> Result<TransformedUnit, TransformError> {
    let lowered = jsx::transpile(code).map_err(|e| TransformError(e.to_string()))?;
    let exported = exported_component_name(code);

    let body = rewrite_imports(&lowered);
    let body = REQUIRE_CALL_RE.replace_all(&body, "__require(").into_owned();
    let (body, name, expression) = rewrite_exports(&body, exported);

    let (name, shape, body) = match name {
        Some(name) if expression => (name, ComponentShape::Expression, body),
        Some(name) => {
            let shape = detect_shape(&body, &name);
            (name, shape, body)
        }
        None => (
            String::from("AnonymousComponent"),
            ComponentShape::Anonymous,
            format!("function AnonymousComponent(props) {{\n{body}\n}}"),
        ),
    };

    let (params, body) = build_factory(&body, &name, allowed, blocked);
    Ok(TransformedUnit {
        name,
        shape,
        params,
        body,
    })
}

fn rewrite_imports(code: &str) -> String {
    let code = IMPORT_FROM_RE.replace_all(code, |caps: &Captures| {
        import_bindings(caps[1].trim(), &caps[2])
    });
    IMPORT_BARE_RE
        .replace_all(&code, |caps: &Captures| {
            if &caps[1] == "react" {
                String::new()
            } else {
                format!("__require({});", quote(&caps[1]))
            }
        })
        .into_owned()
}

/// `React, { useState, useEffect as ue }` from `react` ->
/// `const { useState, useEffect: ue } = React;`
fn import_bindings(clause: &str, module: &str) -> String {
    let is_react = module == "react";
    let source = if is_react {
        String::from("React")
    } else {
        format!("__require({})", quote(module))
    };

    let (head, named) = match clause.find('{') {
        Some(open) => {
            let close = clause[open..].find('}').map_or(clause.len(), |i| open + i);
            (
                clause[..open].trim().trim_end_matches(',').trim(),
                Some(&clause[open + 1..close]),
            )
        }
        None => (clause, None),
    };

    let mut statements = Vec::new();

    if !head.is_empty() {
        if let Some(namespace) = head.strip_prefix('*') {
            let alias = namespace.trim().trim_start_matches("as").trim();
            if !(is_react && alias == "React") {
                statements.push(format!("const {alias} = {source};"));
            }
        } else if !(is_react && head == "React") {
            let member = if is_react { "" } else { ".default" };
            statements.push(format!("const {head} = {source}{member};"));
        }
    }

    if let Some(named) = named {
        let bindings: Vec<String> = named
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once(" as ") {
                Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
                None => item.to_string(),
            })
            .collect();
        if !bindings.is_empty() {
            statements.push(format!("const {{ {} }} = {source};", bindings.join(", ")));
        }
    }

    statements.join(" ")
}

/// Strip `export` keywords. Returns the rewritten body, the entry-point name
/// and whether the default export was an expression.
fn rewrite_exports(code: &str, exported: Option<String>) -> (String, Option<String>, bool) {
    let code = EXPORT_LIST_RE.replace_all(code, "");

    if let Some(caps) = EXPORT_DEFAULT_NAME_RE.captures(&code) {
        let name = caps[1].to_string();
        let code = EXPORT_DEFAULT_NAME_RE.replace(&code, "");
        let code = EXPORT_DECL_RE.replace_all(&code, "$1").into_owned();
        return (code, Some(name), false);
    }

    if EXPORT_DEFAULT_DECL_RE.is_match(&code) {
        let code = EXPORT_DEFAULT_DECL_RE.replace(&code, "$1");
        let code = EXPORT_DECL_RE.replace_all(&code, "$1").into_owned();
        return match exported {
            Some(name) => (code, Some(name), false),
            // `export default function () {}`: give the declaration a name.
            None => {
                let code = code.replacen("function", &format!("function {DEFAULT_BINDING}"), 1);
                (code, Some(DEFAULT_BINDING.to_string()), false)
            }
        };
    }

    if EXPORT_DEFAULT_EXPR_RE.is_match(&code) {
        let code = EXPORT_DEFAULT_EXPR_RE.replace(&code, format!("const {DEFAULT_BINDING} = "));
        let code = EXPORT_DECL_RE.replace_all(&code, "$1").into_owned();
        return (code, Some(DEFAULT_BINDING.to_string()), true);
    }

    let code = EXPORT_DECL_RE.replace_all(&code, "$1").into_owned();
    (code, None, false)
}

fn detect_shape(code: &str, name: &str) -> ComponentShape {
    let name = regex::escape(name);
    let function = compile(&format!(r"\bfunction\s*\*?\s*{name}\s*\("));
    let arrow = compile(&format!(
        r"\b(?:const|let|var)\s+{name}\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>"
    ));
    let class = compile(&format!(
        r"\bclass\s+{name}\s+extends\s+(?:React\.)?(?:Component|PureComponent)\b"
    ));

    if function.is_match(code) {
        ComponentShape::Function
    } else if arrow.is_match(code) {
        ComponentShape::Arrow
    } else if class.is_match(code) {
        ComponentShape::Class
    } else {
        ComponentShape::Binding
    }
}

fn build_factory(
    body: &str,
    name: &str,
    allowed: &[String],
    blocked: &[String],
) -> (Vec<String>, String) {
    let hooks: Vec<&str> = allowed
        .iter()
        .map(String::as_str)
        .filter(|n| is_bindable(n) && !PROLOGUE_BINDINGS.contains(n))
        .collect();

    let mut params = vec![String::from("__capabilities"), String::from("__require")];
    params.extend(
        blocked
            .iter()
            .map(String::as_str)
            .filter(|n| is_bindable(n) && !PROLOGUE_BINDINGS.contains(n) && !hooks.contains(n))
            .map(String::from),
    );

    let mut factory = format!(
        "const {{ {} }} = __capabilities;\n",
        PROLOGUE_BINDINGS.join(", ")
    );
    if !hooks.is_empty() {
        factory.push_str(&format!("const {{ {} }} = React;\n", hooks.join(", ")));
    }
    factory.push_str("{\n");
    factory.push_str(body);
    factory.push_str(&format!("\nreturn {name};\n}}"));
    (params, factory)
}

fn is_bindable(name: &str) -> bool {
    IDENT_RE.is_match(name) && !RESERVED_WORDS.contains(&name)
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(code: &str) -> TransformedUnit {
        transform(code, &names(&["React", "useState"]), &names(&["eval", "fetch", "import"]))
            .unwrap()
    }

    #[test]
    fn test_function_declaration() {
        let unit = run("import React, { useState } from 'react';\nexport default function Counter() { return <b/>; }");
        assert_eq!(unit.name, "Counter");
        assert_eq!(unit.shape, ComponentShape::Function);
        assert!(unit.body.contains("const { useState } = React;\nfunction Counter()"));
        assert!(unit.body.contains(r#"return h("b", null);"#));
        assert!(unit.body.ends_with("return Counter;\n}"));
        assert!(!unit.body.contains("export"));
        assert!(!unit.body.contains("import"));
    }

    #[test]
    fn test_arrow_component() {
        let unit = run("const Badge = ({ text }) => <span>{text}</span>;\nexport default Badge;");
        assert_eq!(unit.name, "Badge");
        assert_eq!(unit.shape, ComponentShape::Arrow);
        assert!(unit.body.contains("return Badge;"));
    }

    #[test]
    fn test_class_component() {
        let unit = run(
            "export default class Panel extends React.Component { render() { return <div/>; } }",
        );
        assert_eq!(unit.shape, ComponentShape::Class);
        assert!(unit.body.contains("class Panel extends React.Component"));
    }

    #[test]
    fn test_other_binding() {
        let unit = run("const Inner = () => <i/>;\nconst Outer = React.memo(Inner);\nexport default Outer;");
        assert_eq!(unit.name, "Outer");
        assert_eq!(unit.shape, ComponentShape::Binding);
    }

    #[test]
    fn test_default_expression() {
        let unit = run("export default (props) => <p>{props.x}</p>;");
        assert_eq!(unit.shape, ComponentShape::Expression);
        assert!(unit.body.contains("const __default = (props) => h(\"p\""));
        assert!(unit.body.contains("return __default;"));
    }

    #[test]
    fn test_anonymous_function_declaration() {
        let unit = run("export default function (props) { return <p/>; }");
        assert_eq!(unit.name, DEFAULT_BINDING);
        assert!(unit.body.contains("function __default (props)"));
    }

    #[test]
    fn test_anonymous_fallback() {
        let unit = run("const x = props.value;\nreturn <p>{x}</p>;");
        assert_eq!(unit.shape, ComponentShape::Anonymous);
        assert!(unit
            .body
            .contains("function AnonymousComponent(props) {\nconst x = props.value;"));
        assert!(unit.body.contains("return AnonymousComponent;"));
    }

    #[test]
    fn test_blocked_params() {
        let unit = run("export default function A() { return <a/>; }");
        assert_eq!(
            unit.params,
            names(&["__capabilities", "__require", "eval", "fetch"])
        );
        assert!(unit.body.starts_with("const { React, h, Fragment, useSandboxContext } = __capabilities;\n"));
    }

    #[test]
    fn test_wrapper_breakout_stays_in_body() {
        // Closes the factory early and reopens it after an IIFE
        let code = "export default function A() { return <div>a</div>; }\n}\n}), ((function () { leaked = typeof this.eval; })(), function () {\n{";
        let unit = run(code);
        assert!(unit.body.contains("leaked = typeof this.eval"));
        assert!(unit.body.ends_with("return A;\n}"));
        assert!(!unit.params.iter().any(|p| p.contains('(')));
    }

    #[test]
    fn test_import_bindings() {
        assert_eq!(import_bindings("React", "react"), "");
        assert_eq!(import_bindings("R", "react"), "const R = React;");
        assert_eq!(
            import_bindings("React, { useState, useMemo as memo }", "react"),
            "const { useState, useMemo: memo } = React;"
        );
        assert_eq!(import_bindings("* as React", "react"), "");
        assert_eq!(
            import_bindings("Chart, { Line }", "recharts"),
            r#"const Chart = __require("recharts").default; const { Line } = __require("recharts");"#
        );
        assert_eq!(
            import_bindings("* as icons", "lucide-react"),
            r#"const icons = __require("lucide-react");"#
        );
    }

    #[test]
    fn test_require_and_bare_imports() {
        let unit = run("import './styles.css';\nconst R = require('react');\nexport default function A() { return <a/>; }");
        assert!(unit.body.contains(r#"__require("./styles.css");"#));
        assert!(unit.body.contains("const R = __require('react');"));
    }

    #[test]
    fn test_named_exports_are_stripped() {
        let unit = run("export const size = 2;\nexport function helper() {}\nexport default function A() { return <a/>; }\nexport { size as s };");
        assert!(unit.body.contains("const size = 2;\nfunction helper() {}\nfunction A()"));
        assert!(!unit.body.contains("export"));
    }

    #[test]
    fn test_jsx_error_is_reported() {
        let err = transform(
            "export default function A() { return <a></b>; }",
            &[],
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("transform: JSX syntax error"));
    }
}
