//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::debug;

use crate::mode::Mode;

/// Ralph Wiggum - iterate on a prompt until the model promises completion
#[derive(Parser)]
#[command(
    name = "rw",
    about = "Ralph Wiggum loop: re-run a prompt with carried progress until completion",
    version = env!("CARGO_PKG_VERSION"),
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
    /// Start a new run
    Run {
        /// The task the model should work on
        prompt: String,

        /// Phrase the model must put inside <promise>...</promise>
        #[arg(short = 'p', long)]
        completion_phrase: Option<String>,

        /// Maximum iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Queue identity recorded with the run
        #[arg(short = 'q', long)]
        task_queue: Option<String>,

        /// Run identifier (default: ralph-loop-XXXXXXXX)
        #[arg(long)]
        run_id: Option<String>,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Iteration mode; `auto` lets the model decide each iteration
        #[arg(long, value_enum, default_value = "auto")]
        mode: ModeArg,
    },

    /// Continue a run from its last checkpoint
    Resume {
        /// Run identifier
        run_id: String,
    },

    /// Show the checkpointed state of a run
    Show {
        /// Run identifier
        run_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List checkpointed runs
    List,
}

/// Mode selection for `rw run`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    #[default]
    Auto,
    Single,
    Multi,
}

impl ModeArg {
    /// The fixed mode, or `None` when the model decides
    pub fn fixed(self) -> Option<Mode> {
        debug!(?self, "ModeArg::fixed: called");
        match self {
            ModeArg::Auto => None,
            ModeArg::Single => Some(Mode::Single),
            ModeArg::Multi => Some(Mode::Multi),
        }
    }
}

/// Output format for `rw show`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph-wiggum")
        .join("logs")
        .join("rw.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// The `--config`/`-c` value from raw arguments, before clap has parsed them
pub fn config_path_from_args(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Generate the after_help text with credential status and log location
pub fn generate_after_help(key_env: &str) -> String {
    debug!(%key_env, "generate_after_help: called");
    let key_present = std::env::var(key_env).is_ok_and(|v| !v.trim().is_empty());

    let mut help = String::new();
    help.push_str("Credentials:\n");
    let icon = if key_present {
        debug!("generate_after_help: credential present");
        "\u{2705}"
    } else {
        debug!("generate_after_help: credential missing");
        "\u{274C}"
    };
    help.push_str(&format!("  {} {}\n", icon, key_env));

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help.push('\n');
    help.push_str("Exit codes: 0 completed, 1 error, 2 exhausted, 3 failed, 4 configuration error, 130 cancelled\n");
    help
}
