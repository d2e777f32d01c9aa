//! Component Sandbox CLI
//!
//! Single-shot mode:
//!   component-sandbox validate <file>   (prints the report and the filled-in record)
//!   component-sandbox execute <file> [--props JSON] [--config sandbox.toml]
//!   component-sandbox templates
//!   component-sandbox template <name>
//!
//! Server mode (persistent process, reads from stdin):
//!   component-sandbox serve [--config sandbox.toml]
//!
//! Protocol (server mode):
//!   Request (stdin, one JSON object per line):
//!     {"action":"execute","name":"Counter","code":"export default ...","context":{"props":{"step":2}}}
//!     {"action":"validate","name":"Counter","code":"export default ..."}
//!     {"action":"template","name":"counter"}
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:1234
//!
//!     {"component":"Counter","html":"<div>...</div>",...}
//!
//!   Error response:
//!     Status:Error
//!     Length:42
//!
//!     Component execution timed out after 5000ms

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use component_sandbox::{
    create_component_template, get_available_templates, validate_component, Component,
    ComponentSandbox, ConsoleOutput, ExecutionContext, SandboxOptions,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};

#[derive(Debug, Parser)]
#[command(name = "component-sandbox")]
#[command(about = "Vet and render user-authored UI components in an isolated runtime")]
struct Args {
    /// Log pipeline phases at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Statically validate a component source file
    Validate {
        file: PathBuf,
        /// Component name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Validate and render a component source file
    Execute {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Props as a JSON object
        #[arg(long)]
        props: Option<String>,
        /// Sandbox options (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Render as a preview
        #[arg(long)]
        preview: bool,
        /// Render in editing mode
        #[arg(long)]
        editing: bool,
        /// Print the render tree as JSON instead of HTML
        #[arg(long)]
        tree: bool,
    },
    /// List starter template names
    Templates,
    /// Print a starter template's source
    Template { name: String },
    /// Render components from JSON lines on stdin
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// One request in server mode.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ServeRequest {
    Validate {
        name: String,
        code: String,
    },
    Execute {
        name: String,
        code: String,
        #[serde(default, rename = "defaultProps")]
        default_props: Map<String, Value>,
        #[serde(default)]
        context: ExecutionContext,
    },
    Template {
        name: String,
    },
}

/// Flags for single-shot execution.
struct ExecuteArgs<'a> {
    props_json: Option<&'a str>,
    config: Option<&'a Path>,
    preview: bool,
    editing: bool,
    tree: bool,
}

fn load_options(config: Option<&Path>) -> Result<SandboxOptions> {
    match config {
        Some(path) => Ok(SandboxOptions::load(path)?),
        None => Ok(SandboxOptions::default()),
    }
}

fn read_component(file: &Path, name: Option<String>) -> Result<Component> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = name.unwrap_or_else(|| {
        file.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("Component"))
    });
    Ok(Component::new(name, code))
}

fn print_console(console: &ConsoleOutput) {
    for log in &console.logs {
        eprintln!("[LOG] {}", log);
    }
    for warn in &console.warns {
        eprintln!("[WARN] {}", warn);
    }
    for err in &console.errors {
        eprintln!("[ERROR] {}", err);
    }
}

/// Print the validation report and the component record it fills in.
fn run_validate(file: &Path, name: Option<String>) -> Result<()> {
    let mut component = read_component(file, name)?;
    let result = validate_component(&component);
    component.apply_validation(&result);

    let report = json!({ "validation": &result, "component": &component });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if result.is_valid {
        Ok(())
    } else {
        Err(anyhow!("{} validation error(s)", result.errors.len()))
    }
}

/// Run in single-shot mode
async fn run_execute(file: &Path, name: Option<String>, args: ExecuteArgs<'_>) -> Result<()> {
    let props: Map<String, Value> = match args.props_json {
        Some(json) => {
            serde_json::from_str(json).map_err(|e| anyhow!("Invalid props JSON: {}", e))?
        }
        None => Map::new(),
    };

    let component = read_component(file, name)?;
    let context = ExecutionContext {
        is_preview: args.preview,
        is_editing: args.editing,
        ..ExecutionContext::with_props(props)
    };

    let mut sandbox = ComponentSandbox::new(load_options(args.config)?)?;
    let output = sandbox.execute(&component, &context).await?;

    print_console(&output.console);
    if args.tree {
        println!("{}", serde_json::to_string_pretty(&output.tree)?);
    } else {
        println!("{}", output.html);
    }
    Ok(())
}

/// Run in server mode (persistent process, reads requests from stdin)
async fn run_server(config: Option<&Path>) -> Result<()> {
    let mut sandbox = ComponentSandbox::new(load_options(config)?)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    info!("Server ready, reading from stdin");

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            // EOF - stdin closed, exit gracefully
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: ServeRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut stdout, false, &format!("Invalid request JSON: {}", e))?;
                continue;
            }
        };
        debug!(?request, "Request received");

        match request {
            ServeRequest::Validate { name, code } => {
                let result = validate_component(&Component::new(name, code));
                write_response(&mut stdout, true, &serde_json::to_string(&result)?)?;
            }
            ServeRequest::Execute {
                name,
                code,
                default_props,
                context,
            } => {
                let component = Component::new(name, code).with_default_props(default_props);
                match sandbox.execute(&component, &context).await {
                    Ok(output) => {
                        print_console(&output.console);
                        write_response(&mut stdout, true, &serde_json::to_string(&output)?)?;
                    }
                    Err(e) => {
                        write_response(&mut stdout, false, &e.to_string())?;
                    }
                }
            }
            ServeRequest::Template { name } => {
                write_response(&mut stdout, true, create_component_template(&name))?;
            }
        }
    }

    info!("Server shutting down");
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?; // Empty line separator
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries results, logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Validate { file, name } => run_validate(&file, name),
        Command::Execute {
            file,
            name,
            props,
            config,
            preview,
            editing,
            tree,
        } => {
            let args = ExecuteArgs {
                props_json: props.as_deref(),
                config: config.as_deref(),
                preview,
                editing,
                tree,
            };
            run_execute(&file, name, args).await
        }
        Command::Templates => {
            for name in get_available_templates() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Template { name } => {
            print!("{}", create_component_template(&name));
            Ok(())
        }
        Command::Serve { config } => run_server(config.as_deref()).await,
    }
}
