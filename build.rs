//! Build script to create the V8 snapshot component isolates boot from.
//!
//! The component runtime JS is evaluated here once, so each isolate only
//! deserializes the snapshot instead of parsing and compiling the facade.

use std::env;
use std::path::PathBuf;

// Include the shared ops module using #[path] attribute
// This ensures ops are IDENTICAL between build.rs and runtime
#[path = "src/ops.rs"]
#[allow(dead_code)]
mod ops;

fn main() {
    println!("cargo:rerun-if-changed=src/bootstrap.js");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/ops.rs");

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let snapshot_path = out_dir.join("COMPONENT_SNAPSHOT.bin");

    let snapshot = deno_core::snapshot::create_snapshot(
        deno_core::snapshot::CreateSnapshotOptions {
            cargo_manifest_dir: env!("CARGO_MANIFEST_DIR"),
            startup_snapshot: None,
            skip_op_registration: false,
            // Only the component extension: no web, fs or net APIs exist in the isolate
            extensions: vec![ops::component_runtime::init_ops_and_esm()],
            with_runtime_cb: None,
            extension_transpiler: None,
        },
        None,
    )
    .expect("Failed to create snapshot");

    std::fs::write(&snapshot_path, snapshot.output).expect("Failed to write snapshot");
}
