// Integration tests for the validate -> transform -> execute -> render pipeline

use component_sandbox::{
    create_component_template, execute_component, validate_component, Component,
    ComponentSandbox, ComponentShape, ConfigError, ExecutionContext, ExecutionError,
    ExecutionPhase, SandboxOptions, Theme, ThemeMode,
};
use serde_json::{json, Map, Value};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_test_writer()
            .init();
    });
}

fn props(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn sandbox() -> ComponentSandbox {
    ComponentSandbox::new(SandboxOptions::default()).unwrap()
}

async fn render(code: &str, context: &ExecutionContext) -> Result<String, ExecutionError> {
    let component = Component::new("Test", code);
    let output = sandbox().execute(&component, context).await?;
    Ok(output.html)
}

#[tokio::test]
async fn test_counter_template_renders_initial_value() {
    init_tracing();

    let component = Component::new("Counter", create_component_template("counter"));
    let validation = validate_component(&component);
    assert!(validation.is_valid, "{:?}", validation.errors);
    assert_eq!(validation.dependencies, vec!["react".to_string()]);
    for name in ["initialValue", "step", "label"] {
        assert!(validation.props.contains_key(name), "missing prop {name}");
    }

    let context = ExecutionContext::with_props(props(json!({
        "initialValue": 5,
        "step": 2,
        "label": "X"
    })));
    let output = sandbox().execute(&component, &context).await.unwrap();

    assert_eq!(output.component, "Counter");
    assert_eq!(output.shape, ComponentShape::Function);
    assert!(output.html.contains(r#"<span class="counter-value">5</span>"#), "{}", output.html);
    assert!(output.html.contains(r#"<h3 class="counter-label">X</h3>"#), "{}", output.html);
    assert!(output.html.contains("<button>+2</button>"), "{}", output.html);
    assert!(!output.html.contains("onClick"));
    assert!(output.console.is_empty());
}

#[tokio::test]
async fn test_restricted_api_never_executes() {
    init_tracing();

    let component = Component::new(
        "Leaky",
        "export default function Leaky() {\n  fetch('/api/secrets');\n  return <div>hi</div>;\n}\n",
    );
    let validation = validate_component(&component);
    assert!(!validation.is_valid);
    assert!(validation
        .errors
        .contains(&"Restricted API detected: fetch".to_string()));

    let mut sandbox = sandbox();
    let err = sandbox
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ValidationFailed(ref errors)
        if errors.contains(&"Restricted API detected: fetch".to_string())));
    assert!(!err.is_retryable());
    assert_eq!(sandbox.phase(), ExecutionPhase::Rejected);
}

#[tokio::test]
async fn test_unbalanced_braces_rejected() {
    init_tracing();

    let component = Component::new(
        "Broken",
        "export default function Broken() {\n  return <div>broken</div>;\n",
    );
    let validation = validate_component(&component);
    assert!(!validation.is_valid);
    assert!(validation
        .errors
        .iter()
        .any(|e| e.contains("unbalanced curly braces")));
}

#[tokio::test]
async fn test_synchronous_loop_times_out() {
    init_tracing();

    let options = SandboxOptions {
        timeout_ms: 1_000,
        ..Default::default()
    };
    let mut sandbox = ComponentSandbox::new(options).unwrap();
    let component = Component::new(
        "Spin",
        "export default function Spin() {\n  let i = 0;\n  while (i >= 0) { i++; }\n  return <div>{i}</div>;\n}\n",
    );
    assert!(validate_component(&component).is_valid);

    let started = std::time::Instant::now();
    let err = sandbox
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap_err();
    assert_eq!(err, ExecutionError::Timeout(1_000));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(sandbox.phase(), ExecutionPhase::TimedOut);

    // The sandbox stays usable after termination
    let basic = Component::new("MyComponent", create_component_template("basic"));
    let output = sandbox
        .execute(&basic, &ExecutionContext::default())
        .await
        .unwrap();
    assert!(output.html.contains("<h3>Hello</h3>"));
}

#[tokio::test]
async fn test_microtask_loop_times_out() {
    init_tracing();

    let options = SandboxOptions {
        timeout_ms: 1_000,
        fresh_isolate: false,
        ..Default::default()
    };
    let mut sandbox = ComponentSandbox::new(options).unwrap();
    let before = sandbox.ambient_snapshot().unwrap();

    let component = Component::new(
        "Ticker",
        "export default function Ticker() {\n  const tick = () => Promise.resolve().then(tick);\n  tick();\n  return <div>ticking</div>;\n}\n",
    );
    assert!(validate_component(&component).is_valid);

    let started = std::time::Instant::now();
    let err = sandbox
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap_err();
    assert_eq!(err, ExecutionError::Timeout(1_000));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(sandbox.phase(), ExecutionPhase::TimedOut);
    assert_eq!(sandbox.ambient_snapshot().unwrap(), before);

    // No queued tick survives into the next call
    let basic = Component::new("MyComponent", create_component_template("basic"));
    let output = sandbox
        .execute(&basic, &ExecutionContext::default())
        .await
        .unwrap();
    assert!(output.html.contains("<h3>Hello</h3>"));
    assert_eq!(sandbox.ambient_snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_wrapper_breakout_rejected() {
    init_tracing();

    let code = "export default function A() { return <div>a</div>; }\n}\n}), ((function () { leaked = typeof this.eval; })(), function () {\n{";
    let component = Component::new("A", code);

    let mut sandbox = ComponentSandbox::new(SandboxOptions {
        fresh_isolate: false,
        ..Default::default()
    })
    .unwrap();
    let err = sandbox
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ValidationFailed(ref errors)
        if errors.contains(&"Syntax error: '}' before a matching '{'".to_string())), "{err}");

    let leaked = Component::new(
        "Leaked",
        "export default function Leaked() {\n  function read() { return typeof this.leaked; }\n  return <div>{read()}</div>;\n}\n",
    );
    let output = sandbox
        .execute(&leaked, &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(output.html, "<div>undefined</div>");
}

#[tokio::test]
async fn test_same_line_spaces_between_expressions() {
    init_tracing();

    let code = "export default function Name({ first = 'Ada', last = 'Lovelace' }) {\n  return (\n    <p>\n      {first} {last}\n    </p>\n  );\n}\n";
    let html = render(code, &ExecutionContext::default()).await.unwrap();
    assert_eq!(html, "<p>Ada Lovelace</p>");
}

#[tokio::test]
async fn test_ambient_globals_restored_after_each_call() {
    init_tracing();

    let options = SandboxOptions {
        fresh_isolate: false,
        ..Default::default()
    };
    let mut sandbox = ComponentSandbox::new(options).unwrap();
    let before = sandbox.ambient_snapshot().unwrap();
    let eval = before.iter().find(|b| b.name == "eval").unwrap();
    assert!(eval.present);
    assert_eq!(eval.kind, "function");

    // Sloppy-mode `this` in a plain call is the global object
    let peek = Component::new(
        "Peek",
        "export default function Peek() {\n  function peek() { return typeof this.eval; }\n  return <div>{peek()}</div>;\n}\n",
    );
    let output = sandbox
        .execute(&peek, &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(output.html, "<div>undefined</div>");
    assert_eq!(sandbox.ambient_snapshot().unwrap(), before);

    let boom = Component::new(
        "Boom",
        "export default function Boom() {\n  throw new Error('boom');\n  return <div />;\n}\n",
    );
    let err = sandbox
        .execute(&boom, &ExecutionContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Runtime(ref m) if m.contains("boom")), "{err}");
    assert_eq!(sandbox.ambient_snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_fresh_isolate_per_execution() {
    init_tracing();

    let code = "export default function Marker() {\n  function mark() { this.leaked = (this.leaked || 0) + 1; return this.leaked; }\n  return <div>{mark()}</div>;\n}\n";
    let component = Component::new("Marker", code);
    let context = ExecutionContext::default();

    let mut fresh = sandbox();
    for _ in 0..2 {
        let output = fresh.execute(&component, &context).await.unwrap();
        assert_eq!(output.html, "<div>1</div>");
    }

    let mut shared = ComponentSandbox::new(SandboxOptions {
        fresh_isolate: false,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        shared.execute(&component, &context).await.unwrap().html,
        "<div>1</div>"
    );
    assert_eq!(
        shared.execute(&component, &context).await.unwrap().html,
        "<div>2</div>"
    );
}

#[tokio::test]
async fn test_code_generation_through_constructor_alias() {
    init_tracing();

    let code = "export default function Sneaky() {\n  const make = (() => {}).constructor;\n  const run = make('return 1');\n  return <div>{run()}</div>;\n}\n";
    let component = Component::new("Sneaky", code);
    assert!(validate_component(&component).is_valid);

    let err = render(code, &ExecutionContext::default()).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Runtime(ref m) if m.contains("EvalError")), "{err}");
}

#[tokio::test]
async fn test_class_component() {
    init_tracing();

    let code = "import React from 'react';\n\nexport default class Greeting extends React.Component {\n  render() {\n    return <p className=\"greeting\">Hello, {this.props.name}</p>;\n  }\n}\n";
    let component = Component::new("Greeting", code);
    let output = sandbox()
        .execute(
            &component,
            &ExecutionContext::with_props(props(json!({"name": "Ada"}))),
        )
        .await
        .unwrap();
    assert_eq!(output.shape, ComponentShape::Class);
    assert_eq!(output.html, r#"<p class="greeting">Hello, Ada</p>"#);
}

#[tokio::test]
async fn test_sandbox_context_available() {
    init_tracing();

    let code = "export default function Themed() {\n  const { theme, slideId, isPreview } = useSandboxContext();\n  return <div className={theme.mode} data-preview={isPreview}>{slideId}</div>;\n}\n";
    let context = ExecutionContext {
        theme: Theme {
            mode: ThemeMode::Dark,
            ..Default::default()
        },
        slide_id: Some("slide-1".to_string()),
        is_preview: true,
        ..Default::default()
    };
    let html = render(code, &context).await.unwrap();
    assert_eq!(html, r#"<div class="dark" data-preview>slide-1</div>"#);
}

#[tokio::test]
async fn test_console_capture() {
    init_tracing();

    let code = "export default function Loud() {\n  console.log('rendering', 1);\n  console.warn({ a: 1 });\n  return <div />;\n}\n";
    let component = Component::new("Loud", code);

    let output = sandbox()
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(output.console.logs, vec!["rendering 1".to_string()]);
    assert_eq!(output.console.warns, vec![r#"{"a":1}"#.to_string()]);

    let mut quiet = ComponentSandbox::new(SandboxOptions {
        enable_console: false,
        ..Default::default()
    })
    .unwrap();
    let output = quiet
        .execute(&component, &ExecutionContext::default())
        .await
        .unwrap();
    assert!(output.console.is_empty());
}

#[tokio::test]
async fn test_default_props_under_context_props() {
    init_tracing();

    let component = Component::new("MyComponent", create_component_template("basic"))
        .with_default_props(props(json!({"title": "From defaults", "message": "Default body"})));
    let context = ExecutionContext::with_props(props(json!({"message": "From context"})));

    let output = sandbox().execute(&component, &context).await.unwrap();
    assert!(output.html.contains("<h3>From defaults</h3>"), "{}", output.html);
    assert!(output.html.contains("<p>From context</p>"), "{}", output.html);
}

#[tokio::test]
async fn test_polluting_props_rejected() {
    init_tracing();

    let component = Component::new("MyComponent", create_component_template("basic"));
    let context = ExecutionContext::with_props(props(json!({"__proto__": {"admin": true}})));

    let mut sandbox = sandbox();
    let err = sandbox.execute(&component, &context).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Runtime(ref m) if m.starts_with("props:")), "{err}");
    assert_eq!(sandbox.phase(), ExecutionPhase::Faulted);
}

#[tokio::test]
async fn test_markup_from_components_is_escaped() {
    init_tracing();

    let code = "export default function Sneaky({ payload = '<img src=x onerror=alert(1)>' }) {\n  return <a href=\"javascript:alert(1)\" title={payload}>{payload}</a>;\n}\n";
    let html = render(code, &ExecutionContext::default()).await.unwrap();
    assert_eq!(
        html,
        r#"<a title="&lt;img src=x onerror=alert(1)&gt;">&lt;img src=x onerror=alert(1)&gt;</a>"#
    );
}

#[tokio::test]
async fn test_execute_component_outcome() {
    init_tracing();

    let component = Component::new("MyComponent", create_component_template("basic"));
    let outcome = execute_component(&component, &ExecutionContext::default()).await;
    assert!(outcome.success);
    assert!(outcome.error.is_none());
    let result = outcome.result.unwrap();
    assert!(result.html.contains("<h3>Hello</h3>"), "{}", result.html);

    let rejected = Component::new(
        "Leaky",
        "export default function Leaky() {\n  fetch('/x');\n  return <div />;\n}\n",
    );
    let outcome = execute_component(&rejected, &ExecutionContext::default()).await;
    assert!(!outcome.success);
    assert!(outcome.result.is_none());
    assert!(outcome
        .error
        .unwrap()
        .starts_with("Component failed validation"));
}

#[tokio::test]
async fn test_invalid_options_refused() {
    init_tracing();

    let result = ComponentSandbox::new(SandboxOptions {
        timeout_ms: 10,
        ..Default::default()
    });
    match result {
        Err(ConfigError::Invalid(errors)) => {
            assert!(errors[0].contains("Timeout must be at least 1000ms"))
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("options with a 10ms timeout were accepted"),
    }
}

#[tokio::test]
async fn test_every_template_executes() {
    init_tracing();

    let mut sandbox = sandbox();
    for name in component_sandbox::get_available_templates() {
        let component = Component::new(name, create_component_template(name));
        let output = sandbox
            .execute(&component, &ExecutionContext::default())
            .await
            .unwrap_or_else(|e| panic!("template {name} failed: {e}"));
        assert!(!output.html.is_empty(), "template {name} rendered nothing");
    }
}
