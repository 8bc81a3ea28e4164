//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::domain::{Complexity, DetailLevel, DiagramType};

/// dg - quality-driven Mermaid diagram generation
#[derive(Parser)]
#[command(
    name = "dg",
    about = "Turn a natural-language request into quality-checked Mermaid diagrams",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate diagrams for a request
    Generate {
        /// What to diagram, in plain language
        request: String,

        /// Diagram type to generate (repeatable); defaults from config
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        types: Vec<DiagramType>,

        /// Minimum aggregate quality score (0-100)
        #[arg(long)]
        threshold: Option<f64>,

        /// Accept the first diagram without repair attempts
        #[arg(long)]
        no_auto_fix: bool,

        /// Complexity (simple, medium, complex)
        #[arg(long, default_value = "medium")]
        complexity: Complexity,

        /// Detail level (brief, standard, detailed)
        #[arg(long, default_value = "standard")]
        detail: DetailLevel,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List supported diagram types
    Types,

    /// Show the resolved configuration
    Config,

    /// Check the completion service and session capacity
    Health {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("diagramgen")
        .join("logs")
        .join("dg.log")
}

/// Directory searched for prompt overrides (`{name}.pmt`)
pub fn get_prompts_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("diagramgen").join("prompts"))
}

/// Generate the after_help text with the log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();
    help.push_str("Diagram types:\n");
    help.push_str(&format!("  {}\n", DiagramType::expected()));
    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    if let Some(dir) = get_prompts_dir() {
        help.push_str(&format!("Prompt overrides are read from: {}\n", dir.display()));
    }
    help
}
