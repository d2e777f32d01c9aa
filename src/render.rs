//! Host-side rendering of the data tree components produce.
//!
//! Components never emit markup directly: they return `RenderNode`s, and this
//! module decides what reaches the page.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements dropped entirely, children included.
const FORBIDDEN_ELEMENTS: &[&str] = &[
    "script", "iframe", "frame", "frameset", "object", "embed", "base", "link", "meta",
];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href", "poster"];

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap_or_else(|e| panic!("{e}")));
static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_:][A-Za-z0-9_:.-]*$").unwrap_or_else(|e| panic!("{e}"))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Text(String),
}

/// One node of a rendered component tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderNode {
    Text {
        text: String,
    },
    Element {
        tag: String,
        #[serde(default)]
        attributes: IndexMap<String, AttributeValue>,
        #[serde(default)]
        children: Vec<RenderNode>,
    },
}

impl RenderNode {
    pub fn text(value: impl Into<String>) -> Self {
        RenderNode::Text { text: value.into() }
    }

    /// Concatenated text content of this node and its descendants.
    pub fn text_content(&self) -> String {
        match self {
            RenderNode::Text { text } => text.clone(),
            RenderNode::Element { children, .. } => {
                children.iter().map(RenderNode::text_content).collect()
            }
        }
    }
}

/// Serialize a tree to HTML, escaping all text and dropping anything that
/// could execute in the host page.
pub fn to_html(nodes: &[RenderNode]) -> String {
    let mut html = String::new();
    for node in nodes {
        write_node(node, &mut html);
    }
    html
}

fn write_node(node: &RenderNode, html: &mut String) {
    match node {
        RenderNode::Text { text } => html.push_str(&escape_text(text)),
        RenderNode::Element {
            tag,
            attributes,
            children,
        } => {
            let tag_lower = tag.to_ascii_lowercase();
            if FORBIDDEN_ELEMENTS.contains(&tag_lower.as_str()) {
                return;
            }
            if !TAG_RE.is_match(tag) {
                for child in children {
                    write_node(child, html);
                }
                return;
            }

            html.push('<');
            html.push_str(tag);
            for (name, value) in attributes {
                if !is_safe_attribute(name, value) {
                    continue;
                }
                match value {
                    AttributeValue::Flag(true) => {
                        html.push(' ');
                        html.push_str(name);
                    }
                    AttributeValue::Flag(false) => {}
                    AttributeValue::Text(text) => {
                        html.push(' ');
                        html.push_str(name);
                        html.push_str("=\"");
                        html.push_str(&escape_attribute(text));
                        html.push('"');
                    }
                }
            }
            html.push('>');

            if VOID_ELEMENTS.contains(&tag_lower.as_str()) {
                return;
            }
            for child in children {
                write_node(child, html);
            }
            html.push_str("</");
            html.push_str(tag);
            html.push('>');
        }
    }
}

fn is_safe_attribute(name: &str, value: &AttributeValue) -> bool {
    if !ATTRIBUTE_RE.is_match(name) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("on") {
        return false;
    }
    if let AttributeValue::Text(text) = value {
        if URL_ATTRIBUTES.contains(&lower.as_str()) && is_script_url(text) {
            return false;
        }
    }
    true
}

fn is_script_url(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:") || compact.starts_with("data:text/html")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(text: &str) -> String {
    escape_text(text).replace('"', "&quot;").replace('\'', "&#39;")
}
