//! # Component Sandbox
//!
//! Vetting and isolated execution of user-authored UI components using deno_core.
//!
//! ## Pipeline
//!
//! 1. **Validate**: static checks on size, restricted APIs, dangerous patterns,
//!    hook usage, dependencies, props and bracket balance
//! 2. **Transform**: JSX is lowered to `h()` calls, imports and exports are
//!    rewritten, and the source is wrapped in a capability-taking factory
//! 3. **Execute**: the factory runs in a snapshot-booted V8 isolate with no
//!    fs, net, env or timer APIs, under a watchdog timeout and heap limit
//! 4. **Render**: the returned element tree is turned into escaped HTML on
//!    the host side
//!
//! ## Usage
//!
//! ```rust,ignore
//! use component_sandbox::{
//!     create_component_template, Component, ComponentSandbox, ExecutionContext, SandboxOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let component = Component::new("Counter", create_component_template("counter"));
//!     let context = ExecutionContext::with_props(
//!         serde_json::json!({ "initialValue": 5 }).as_object().cloned().unwrap_or_default(),
//!     );
//!
//!     let mut sandbox = ComponentSandbox::new(SandboxOptions::default())?;
//!     let output = sandbox.execute(&component, &context).await?;
//!     println!("{}", output.html);
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod error;
pub mod jsx;
mod ops;
pub mod options;
pub mod render;
mod runtime;
mod sanitize;
pub mod templates;
pub mod transform;
pub mod validator;

pub use component::{Component, ComponentSize, ExecutionContext, Theme, ThemeMode};
pub use error::{ConfigError, ExecutionError};
pub use ops::ConsoleOutput;
pub use options::{OptionsValidation, SandboxOptions};
pub use render::RenderNode;
pub use runtime::{
    AmbientBinding, ComponentSandbox, ExecutionOutcome, ExecutionPhase, RenderableOutput,
};
pub use transform::ComponentShape;
pub use validator::ValidationResult;

/// Statically vet a component's source without executing it.
pub fn validate_component(component: &Component) -> ValidationResult {
    validator::validate(component)
}

/// Validate and run `component` in a fresh sandbox with default options.
///
/// Never fails: errors are reported through `ExecutionOutcome::error`.
pub async fn execute_component(
    component: &Component,
    context: &ExecutionContext,
) -> ExecutionOutcome {
    runtime::execute_component(component, context).await
}

/// Source of a named starter template; unknown names fall back to "basic".
pub fn create_component_template(name: &str) -> &'static str {
    templates::create_component_template(name)
}

pub fn get_available_templates() -> Vec<&'static str> {
    templates::available_templates()
}

pub fn validate_sandbox_options(options: &SandboxOptions) -> OptionsValidation {
    options::validate_sandbox_options(options)
}
