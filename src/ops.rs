//! Shared ops module - used by both build.rs (snapshot) and runtime.rs
//!
//! This module contains all custom ops and the extension! macro definition.
//! It must be importable by both the main crate and the build script, so it
//! only depends on crates listed under `[build-dependencies]`.

use deno_core::{op2, OpState};
use serde::Serialize;

// ============================================================================
// Console Output Capture
// ============================================================================

/// Console output captured from components during one execution.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.warns.is_empty() && self.errors.is_empty()
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    component_runtime,
    ops = [op_console_log, op_console_warn, op_console_error],
    esm_entry_point = "ext:component_runtime/bootstrap.js",
    esm = ["ext:component_runtime/bootstrap.js" = "src/bootstrap.js"],
);
