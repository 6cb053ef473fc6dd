//! Inspect what the engine does to names, schemas, model text, and results.
//!
//! # Examples
//!
//! ```sh
//! # Sanitize tool names
//! toolcall sanitize "api_1111__dn_list_items" "places/search-v2"
//!
//! # Normalize a parameter schema (stdin or --file)
//! cat schema.json | toolcall normalize
//!
//! # Recover tool calls from model text
//! echo 'Let me look. search_places(query="tacos")' | toolcall recover --tool search_places
//!
//! # Compress a tool result payload
//! toolcall compress --limit 5 --file result.json
//!
//! # Use engine settings from a config file
//! toolcall --config engine.json compress --file result.json
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::io::{self, Read};
use std::process;
use toolcall_rs::ToolDefinition;
use toolcall_rs::agent::config::EngineConfig;
use toolcall_rs::agent::recovery::CallRecovery;
use toolcall_rs::context::ResultCompressor;
use toolcall_rs::tools::names::{NameMapping, sanitize_name};
use toolcall_rs::tools::schema::{normalize, normalize_parameters};
use tracing_subscriber::EnvFilter;

/// Debug front end for the tool-calling engine.
#[derive(Parser)]
#[command(name = "toolcall", version)]
struct Cli {
    /// Load EngineConfig from a JSON file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sanitized form of each name
    Sanitize {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Normalize a JSON schema
    Normalize {
        /// Read the schema from a file instead of stdin
        #[arg(long)]
        file: Option<String>,
    },

    /// Recover tool calls from model text
    Recover {
        /// Known tool name (repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// JSON array of tool definitions; their sanitized names become known
        #[arg(long)]
        catalog: Option<String>,

        /// Read the text from a file instead of stdin
        #[arg(long)]
        file: Option<String>,
    },

    /// Compress a tool-result text payload
    Compress {
        /// Item limit (defaults to the history budget)
        #[arg(long)]
        limit: Option<usize>,

        /// Read the payload from a file instead of stdin
        #[arg(long)]
        file: Option<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<String, String> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Sanitize { names } => Ok(names
            .iter()
            .map(|n| sanitize_name(n))
            .collect::<Vec<_>>()
            .join("\n")),
        Command::Normalize { file } => {
            let schema: Value = serde_json::from_str(&read_input(file.as_deref())?)
                .map_err(|e| format!("input is not JSON: {e}"))?;
            to_pretty(&normalize(&schema))
        }
        Command::Recover {
            tools,
            catalog,
            file,
        } => {
            let text = read_input(file.as_deref())?;
            let names = NameMapping::new();
            let definitions = match catalog {
                Some(path) => load_catalog(path, &names)?,
                None => Vec::new(),
            };
            let mut known: Vec<String> = tools.clone();
            known.extend(definitions.iter().map(|d| d.name.clone()));
            if known.is_empty() {
                return Err("provide --tool or --catalog".into());
            }
            let known: Vec<&str> = known.iter().map(String::as_str).collect();

            let recovered =
                CallRecovery::new(config.recovery.clone()).recover(&text, &known, &definitions);
            to_pretty(&json!({
                "strategy": recovered.strategy,
                "calls": recovered.calls,
                "cleaned_text": recovered.cleaned_text,
            }))
        }
        Command::Compress { limit, file } => {
            let text = read_input(file.as_deref())?;
            let limit = limit.unwrap_or(config.history_item_limit);
            let compressor = ResultCompressor::new(config.compression.clone());
            Ok(compressor.compress_text(&text, limit).unwrap_or(text))
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_input(file: Option<&str>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{path}': {e}")),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

/// Load a catalog and expose it the way the loop would: sanitized, normalized.
fn load_catalog(path: &str, names: &NameMapping) -> Result<Vec<ToolDefinition>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read catalog '{path}': {e}"))?;
    let entries: Vec<ToolDefinition> = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse catalog '{path}': {e}"))?;
    Ok(entries
        .into_iter()
        .map(|d| ToolDefinition {
            name: names.sanitize(&d.name),
            description: d.description,
            parameters: normalize_parameters(&d.parameters),
        })
        .collect())
}

fn to_pretty(value: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize output: {e}"))
}
