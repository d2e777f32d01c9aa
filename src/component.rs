//! Component records and the per-render execution context.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::validator::ValidationResult;

/// Placeholder type tag recorded for every extracted prop.
pub const ANY_PROP_TYPE: &str = "any";

/// Prop name to informal type tag, in first-occurrence order.
pub type PropSchema = IndexMap<String, String>;

/// Width/height in host grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ComponentSize {
    fn default() -> Self {
        Self {
            width: 4,
            height: 3,
        }
    }
}

/// A named, versioned unit of user-authored UI logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    /// Derived from import/require statements.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Derived from destructuring and `props.x` accesses.
    #[serde(default)]
    pub props: PropSchema,
    #[serde(default)]
    pub default_props: Map<String, Value>,
    #[serde(default)]
    pub default_size: ComponentSize,
    #[serde(default = "min_size")]
    pub min_size: ComponentSize,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn min_size() -> ComponentSize {
    ComponentSize {
        width: 2,
        height: 2,
    }
}

fn default_category() -> String {
    String::from("custom")
}

fn first_version() -> u32 {
    1
}

impl Component {
    /// Create a fresh record with a new id and current timestamps.
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            code: code.into(),
            dependencies: Vec::new(),
            props: PropSchema::new(),
            default_props: Map::new(),
            default_size: ComponentSize::default(),
            min_size: min_size(),
            category: default_category(),
            is_public: false,
            tags: Vec::new(),
            version: first_version(),
            usage_count: 0,
            rating: 0.0,
            is_verified: false,
            author_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_default_props(mut self, defaults: Map<String, Value>) -> Self {
        self.default_props = defaults;
        self
    }

    /// Copy the metadata extracted during validation into the record.
    pub fn apply_validation(&mut self, result: &ValidationResult) {
        self.dependencies = result.dependencies.clone();
        self.props = result.props.clone();
    }

    /// Record an in-place edit: bump the version and the update timestamp.
    pub fn touch(&mut self, code: impl Into<String>) {
        self.code = code.into();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    #[serde(default)]
    pub mode: ThemeMode,
    /// Optional style overrides (CSS property name to value).
    #[serde(default)]
    pub overrides: Map<String, Value>,
}

/// Runtime environment for one render of a component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub slide_id: Option<String>,
    #[serde(default)]
    pub element_id: Option<String>,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(default)]
    pub is_editing: bool,
}

impl ExecutionContext {
    pub fn with_props(props: Map<String, Value>) -> Self {
        Self {
            props,
            ..Default::default()
        }
    }

    /// Props as seen by the component: its defaults overlaid by the context's values.
    pub fn merged_props(&self, component: &Component) -> Map<String, Value> {
        let mut merged = component.default_props.clone();
        for (key, value) in &self.props {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_component_has_identity() {
        let a = Component::new("Counter", "export default function Counter() {}");
        let b = Component::new("Counter", "export default function Counter() {}");
        assert_ne!(a.id, b.id);
        assert_eq!(a.version, 1);
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn test_touch_bumps_version() {
        let mut component = Component::new("Counter", "a");
        component.touch("b");
        assert_eq!(component.version, 2);
        assert_eq!(component.code, "b");
        assert!(component.updated_at >= component.created_at);
    }

    #[test]
    fn test_apply_validation_copies_metadata() {
        let mut component = Component::new(
            "Counter",
            crate::templates::create_component_template("counter"),
        );
        assert!(component.dependencies.is_empty());
        assert!(component.props.is_empty());

        let result = crate::validator::validate(&component);
        component.apply_validation(&result);
        assert_eq!(component.dependencies, vec!["react".to_string()]);
        assert_eq!(
            component.props.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["initialValue", "step", "label"]
        );
        assert_eq!(component.props["initialValue"], ANY_PROP_TYPE);
        assert_eq!(component.version, 1);
    }

    #[test]
    fn test_context_props_override_defaults() {
        let component = Component::new("Counter", "")
            .with_default_props(json!({"step": 1, "label": "Count"}).as_object().cloned().unwrap());
        let context =
            ExecutionContext::with_props(json!({"step": 2}).as_object().cloned().unwrap());

        let merged = context.merged_props(&component);
        assert_eq!(merged["step"], json!(2));
        assert_eq!(merged["label"], json!("Count"));
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let component: Component = serde_json::from_value(json!({
            "id": "c1",
            "name": "Counter",
            "code": "export default function Counter() {}",
            "defaultProps": {"step": 2}
        }))
        .unwrap();

        assert_eq!(component.category, "custom");
        assert_eq!(component.min_size, ComponentSize { width: 2, height: 2 });
        assert_eq!(component.default_props["step"], json!(2));
    }

    #[test]
    fn test_context_wire_names() {
        let context: ExecutionContext = serde_json::from_value(json!({
            "props": {"a": 1},
            "theme": {"mode": "dark"},
            "slideId": "s1",
            "isPreview": true
        }))
        .unwrap();

        assert_eq!(context.theme.mode, ThemeMode::Dark);
        assert_eq!(context.slide_id.as_deref(), Some("s1"));
        assert!(context.is_preview);
        assert!(!context.is_editing);
    }
}
