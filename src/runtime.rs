//! Component runtime - executes validated components in a dedicated V8 isolate.
//!
//! The isolate is booted from a snapshot that contains only the component
//! extension, so it has no fs, net, env, timer or storage APIs at all:
//! - console.* is captured through ops (or silenced)
//! - React facade, hooks and the sandbox context are passed in as arguments
//! - blocked names are shadowed in the unit and cleared on the global object
//!   for the duration of the call
//! - the unit is compiled as a function body, never pasted into a script
//! - code generation from strings is disabled at the V8 level
//! - a watchdog thread terminates execution after the configured timeout
//! - the memory budget becomes the V8 heap limit

use crate::component::{Component, ExecutionContext, Theme};
use crate::error::{ConfigError, ExecutionError};
use crate::ops::{component_runtime, ConsoleOutput};
use crate::options::{validate_sandbox_options, SandboxOptions};
use crate::render::{self, RenderNode};
use crate::sanitize::sanitize_props;
use crate::transform::{self, ComponentShape, TransformedUnit};
use crate::validator;
use anyhow::{anyhow, Error};
use deno_core::error::JsError;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static SNAPSHOT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/COMPONENT_SNAPSHOT.bin"));

/// Smallest heap an isolate is given, whatever the configured budget.
const MIN_HEAP_BYTES: usize = 16 * 1024 * 1024;

static V8_FLAGS: Once = Once::new();

/// Result of a successful execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableOutput {
    pub component: String,
    pub shape: ComponentShape,
    pub tree: Vec<RenderNode>,
    pub html: String,
    pub console: ConsoleOutput,
    pub elapsed_ms: u64,
}

/// Flattened execution result for callers that want data, not `Result`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RenderableOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<RenderableOutput, ExecutionError>> for ExecutionOutcome {
    fn from(result: Result<RenderableOutput, ExecutionError>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                result: Some(output),
                error: None,
            },
            Err(e) => Self {
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Per-call state machine; each `execute` starts again from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionPhase {
    Pending,
    Validating,
    Rejected,
    Transforming,
    Executing,
    Succeeded,
    TimedOut,
    Faulted,
}

/// One global binding as seen from inside the isolate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AmbientBinding {
    pub name: String,
    pub present: bool,
    pub kind: String,
    pub label: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SandboxContext<'a> {
    theme: Theme,
    slide_id: Option<&'a str>,
    element_id: Option<&'a str>,
    is_preview: bool,
    is_editing: bool,
}

#[derive(Serialize)]
struct InvocationInput<'a> {
    name: &'a str,
    props: Map<String, Value>,
    context: SandboxContext<'a>,
    allowed: &'a [String],
    blocked: &'a [String],
    console: bool,
}

#[derive(Deserialize)]
struct InvocationResult {
    ok: bool,
    #[serde(default)]
    tree: Vec<RenderNode>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// Isolate
// ============================================================================

struct Isolate {
    runtime: JsRuntime,
    memory_exceeded: Arc<AtomicBool>,
}

fn init_v8_flags() {
    V8_FLAGS.call_once(|| {
        // First element stands in for argv[0].
        let unrecognized = deno_core::v8_set_flags(vec![
            String::from("component-sandbox"),
            String::from("--disallow-code-generation-from-strings"),
        ]);
        if unrecognized.len() > 1 {
            warn!(flags = ?&unrecognized[1..], "V8 rejected sandbox flags");
        }
    });
}

/// Create a sandboxed JS runtime for component execution
fn create_isolate(options: &SandboxOptions) -> Isolate {
    init_v8_flags();

    let heap_limit = options.memory_limit_bytes.max(MIN_HEAP_BYTES);
    let create_params = v8::Isolate::create_params().heap_limits(0, heap_limit);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        startup_snapshot: Some(SNAPSHOT),
        extensions: vec![component_runtime::init_ops()],
        create_params: Some(create_params),
        ..Default::default()
    });

    // Terminate instead of letting V8 abort the process on OOM
    let memory_exceeded = Arc::new(AtomicBool::new(false));
    let flag = memory_exceeded.clone();
    let handle = runtime.v8_isolate().thread_safe_handle();
    runtime.add_near_heap_limit_callback(move |current, initial| {
        warn!(
            current_mb = current / (1024 * 1024),
            initial_mb = initial / (1024 * 1024),
            "Component near heap limit, terminating"
        );
        flag.store(true, Ordering::SeqCst);
        handle.terminate_execution();
        // Headroom for V8 to unwind the terminated script
        current * 2
    });

    // Contexts restored from a snapshot keep their own copy of this bit
    let context = runtime.main_context();
    {
        let scope = &mut runtime.handle_scope();
        v8::Local::new(scope, &context).set_allow_generation_from_strings(false);
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());

    debug!(heap_limit, "Component isolate created");
    Isolate {
        runtime,
        memory_exceeded,
    }
}

/// Terminates the isolate unless disarmed within the budget.
struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(handle: v8::IsolateHandle, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let thread = std::thread::spawn(move || {
            // A dropped sender means the call finished in time.
            if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });
        Self {
            disarm: Some(tx),
            thread: Some(thread),
            fired,
        }
    }

    /// Stop the timer. Once this returns no termination can still arrive.
    fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        drop(self.disarm.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn js_error_message(error: &Error) -> String {
    match error.downcast_ref::<JsError>() {
        Some(js) => js
            .exception_message
            .trim_start_matches("Uncaught ")
            .to_string(),
        None => error.to_string(),
    }
}

fn string_result(runtime: &mut JsRuntime, value: v8::Global<v8::Value>) -> Result<String, Error> {
    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, &value);
    if local.is_string() {
        Ok(local.to_rust_string_lossy(scope))
    } else {
        Err(anyhow!("isolate: sandbox entry point did not return a string"))
    }
}

/// The bootstrap's `__component_sandbox__.execute`.
fn entry_point(runtime: &mut JsRuntime) -> Result<v8::Global<v8::Function>, Error> {
    let value = runtime.execute_script(
        "<entry>",
        String::from("__component_sandbox__.execute"),
    )?;
    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, &value);
    let function = v8::Local::<v8::Function>::try_from(local)
        .map_err(|_| anyhow!("isolate: sandbox entry point is not a function"))?;
    Ok(v8::Global::new(scope, function))
}

fn caught(tc: &mut v8::TryCatch<v8::HandleScope>) -> Error {
    if tc.has_terminated() {
        return anyhow!("isolate: execution terminated");
    }
    match tc.exception() {
        Some(exception) => JsError::from_v8_exception(tc, exception).into(),
        None => anyhow!("isolate: call failed without an exception"),
    }
}

/// Compile the unit body as a function taking `unit.params`.
///
/// V8 parses the body on its own, so a stray closer is a SyntaxError rather
/// than the end of the factory.
fn compile_factory(
    runtime: &mut JsRuntime,
    unit: &TransformedUnit,
) -> Result<v8::Global<v8::Function>, Error> {
    let scope = &mut runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);

    let body = v8::String::new(tc, &unit.body)
        .ok_or_else(|| anyhow!("isolate: component source is too large"))?;
    let params = unit
        .params
        .iter()
        .map(|param| v8::String::new(tc, param))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("isolate: invalid factory parameter"))?;

    let source = v8::script_compiler::Source::new(body, None);
    match v8::script_compiler::compile_function(
        tc,
        source,
        &params,
        &[],
        v8::script_compiler::CompileOptions::NoCompileOptions,
        v8::script_compiler::NoCacheReason::NoReason,
    ) {
        Some(function) => Ok(v8::Global::new(tc, function)),
        None => Err(caught(tc)),
    }
}

fn call_entry(
    runtime: &mut JsRuntime,
    entry: &v8::Global<v8::Function>,
    factory: &v8::Global<v8::Function>,
    input_json: &str,
) -> Result<v8::Global<v8::Value>, Error> {
    let scope = &mut runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);

    let input = v8::String::new(tc, input_json)
        .ok_or_else(|| anyhow!("isolate: invocation input is too large"))?;
    let Some(input) = v8::json::parse(tc, input) else {
        return Err(caught(tc));
    };
    let entry = v8::Local::new(tc, entry);
    let factory = v8::Local::new(tc, factory);
    let receiver = v8::undefined(tc).into();

    match entry.call(tc, receiver, &[factory.into(), input]) {
        Some(value) => Ok(v8::Global::new(tc, value)),
        None => Err(caught(tc)),
    }
}

async fn run_unit(
    runtime: &mut JsRuntime,
    entry: &v8::Global<v8::Function>,
    factory: &v8::Global<v8::Function>,
    input_json: &str,
) -> Result<String, Error> {
    let value = call_entry(runtime, entry, factory, input_json)?;

    // Drain microtasks the component queued while restrictions are still installed
    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    string_result(runtime, value)
}

/// Out-of-memory wins over timeout: a heap-limit termination also stops the clock.
fn settle(
    result: Result<String, Error>,
    timed_out: bool,
    out_of_memory: bool,
    options: &SandboxOptions,
) -> Result<String, ExecutionError> {
    if out_of_memory {
        return Err(ExecutionError::MemoryLimitExceeded(
            options.memory_limit_bytes,
        ));
    }
    if timed_out {
        return Err(ExecutionError::Timeout(options.timeout_ms));
    }
    result.map_err(|e| ExecutionError::Runtime(js_error_message(&e)))
}

fn restore_ambient(runtime: &mut JsRuntime) -> Result<bool, Error> {
    let value = runtime.execute_script(
        "<restore>",
        String::from("__component_sandbox__.restore()"),
    )?;
    let scope = &mut runtime.handle_scope();
    Ok(v8::Local::new(scope, &value).is_true())
}

// ============================================================================
// Sandbox
// ============================================================================

/// Executes components against one isolate configuration.
///
/// Not `Send`: a sandbox and its isolate stay on the thread that created them.
pub struct ComponentSandbox {
    options: SandboxOptions,
    isolate: Isolate,
    executions: u64,
    phase: ExecutionPhase,
}

impl ComponentSandbox {
    /// # Errors
    /// Returns `ConfigError::Invalid` if the options fail their sanity bounds.
    pub fn new(options: SandboxOptions) -> Result<Self, ConfigError> {
        let check = validate_sandbox_options(&options);
        if !check.is_valid {
            return Err(ConfigError::Invalid(check.errors));
        }
        if options.enable_network {
            warn!("enable_network is set, but component isolates have no network access");
        }

        let isolate = create_isolate(&options);
        Ok(Self {
            options,
            isolate,
            executions: 0,
            phase: ExecutionPhase::Pending,
        })
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Phase the most recent execution ended in.
    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    fn enter(&mut self, component: &str, phase: ExecutionPhase) {
        debug!(component, from = ?self.phase, to = ?phase, "Execution phase");
        self.phase = phase;
    }

    /// Validate, transform and render `component` with `context`.
    pub async fn execute(
        &mut self,
        component: &Component,
        context: &ExecutionContext,
    ) -> Result<RenderableOutput, ExecutionError> {
        let started = Instant::now();
        let name = component.name.as_str();
        self.phase = ExecutionPhase::Pending;

        // Never trust a verdict computed elsewhere
        self.enter(name, ExecutionPhase::Validating);
        let validation = validator::validate(component);
        if !validation.is_valid {
            self.enter(name, ExecutionPhase::Rejected);
            warn!(component = name, errors = ?validation.errors, "Component rejected");
            return Err(ExecutionError::ValidationFailed(validation.errors));
        }

        self.enter(name, ExecutionPhase::Transforming);
        let prepared = transform::transform(
            &component.code,
            &self.options.allowed_apis,
            &self.options.blocked_apis,
        )
        .map_err(|e| ExecutionError::Runtime(e.to_string()))
        .and_then(|unit| {
            let props = sanitize_props(context.merged_props(component))
                .map_err(|e| ExecutionError::Runtime(format!("props: {e}")))?;
            let overrides = sanitize_props(context.theme.overrides.clone())
                .map_err(|e| ExecutionError::Runtime(format!("theme: {e}")))?;
            Ok((unit, props, overrides))
        });
        let (unit, props, overrides) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.enter(name, ExecutionPhase::Faulted);
                warn!(component = name, error = %e, "Component could not be prepared");
                return Err(e);
            }
        };

        self.enter(name, ExecutionPhase::Executing);
        if self.options.fresh_isolate && self.executions > 0 {
            self.isolate = create_isolate(&self.options);
        }
        self.executions += 1;

        let sandbox_context = SandboxContext {
            theme: Theme {
                mode: context.theme.mode,
                overrides,
            },
            slide_id: context.slide_id.as_deref(),
            element_id: context.element_id.as_deref(),
            is_preview: context.is_preview,
            is_editing: context.is_editing,
        };

        match self.invoke(&unit, props, sandbox_context).await {
            Ok((tree, console)) => {
                self.enter(name, ExecutionPhase::Succeeded);
                let html = render::to_html(&tree);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                debug!(component = name, elapsed_ms, nodes = tree.len(), "Component rendered");
                Ok(RenderableOutput {
                    component: unit.name,
                    shape: unit.shape,
                    tree,
                    html,
                    console,
                    elapsed_ms,
                })
            }
            Err(e) => {
                let phase = match e {
                    ExecutionError::Timeout(_) => ExecutionPhase::TimedOut,
                    _ => ExecutionPhase::Faulted,
                };
                self.enter(name, phase);
                warn!(component = name, error = %e, "Component execution failed");
                Err(e)
            }
        }
    }

    async fn invoke(
        &mut self,
        unit: &TransformedUnit,
        props: Map<String, Value>,
        context: SandboxContext<'_>,
    ) -> Result<(Vec<RenderNode>, ConsoleOutput), ExecutionError> {
        let input = InvocationInput {
            name: &unit.name,
            props,
            context,
            allowed: &self.options.allowed_apis,
            blocked: &self.options.blocked_apis,
            console: self.options.enable_console,
        };
        let input_json = serde_json::to_string(&input)
            .map_err(|e| ExecutionError::Runtime(format!("isolate: {e}")))?;

        let runtime = &mut self.isolate.runtime;
        let entry = entry_point(runtime)
            .map_err(|e| ExecutionError::Runtime(format!("isolate: {e}")))?;
        let factory = compile_factory(runtime, unit)
            .map_err(|e| ExecutionError::Runtime(js_error_message(&e)))?;

        runtime.op_state().borrow_mut().put(ConsoleOutput::default());
        self.isolate.memory_exceeded.store(false, Ordering::SeqCst);

        let watchdog = Watchdog::arm(
            runtime.v8_isolate().thread_safe_handle(),
            Duration::from_millis(self.options.timeout_ms),
        );
        let result = run_unit(runtime, &entry, &factory, &input_json).await;
        drop((entry, factory));
        let timed_out = watchdog.disarm();
        let out_of_memory = self.isolate.memory_exceeded.load(Ordering::SeqCst);

        if timed_out || out_of_memory {
            runtime.v8_isolate().cancel_terminate_execution();
        }

        let console = runtime
            .op_state()
            .borrow()
            .borrow::<ConsoleOutput>()
            .clone();

        // Runs on every exit path: success, thrown error, termination
        let restored = restore_ambient(runtime);
        if let Err(e) = &restored {
            warn!(error = %e, "Ambient restore failed, replacing isolate");
        }
        // A terminated call can leave microtasks queued for the next one
        if restored.is_err() || timed_out || out_of_memory {
            self.isolate = create_isolate(&self.options);
        }

        let json = settle(result, timed_out, out_of_memory, &self.options)?;
        let outcome: InvocationResult = serde_json::from_str(&json)
            .map_err(|e| ExecutionError::Runtime(format!("render: {e}")))?;
        if !outcome.ok {
            return Err(ExecutionError::Runtime(
                outcome.error.unwrap_or_else(|| String::from("unknown error")),
            ));
        }

        Ok((outcome.tree, console))
    }

    /// State of every allowed/blocked name (plus `console`) on the isolate's
    /// global object.
    pub fn ambient_snapshot(&mut self) -> Result<Vec<AmbientBinding>, Error> {
        let mut names: Vec<&str> = self
            .options
            .allowed_apis
            .iter()
            .chain(self.options.blocked_apis.iter())
            .map(String::as_str)
            .collect();
        names.push("console");
        let script = format!(
            "__component_sandbox__.ambient({})",
            serde_json::to_string(&names)?
        );

        let runtime = &mut self.isolate.runtime;
        let value = runtime.execute_script("<ambient>", script)?;
        let json = string_result(runtime, value)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Execute with default options in a fresh sandbox.
pub async fn execute_component(
    component: &Component,
    context: &ExecutionContext,
) -> ExecutionOutcome {
    let result = match ComponentSandbox::new(SandboxOptions::default()) {
        Ok(mut sandbox) => sandbox.execute(component, context).await,
        Err(e) => Err(ExecutionError::Runtime(format!("isolate: {e}"))),
    };
    ExecutionOutcome::from(result)
}
