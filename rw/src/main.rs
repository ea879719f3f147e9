//! Ralph Wiggum - iterative prompt loop
//!
//! CLI entry point for starting, resuming, and inspecting runs.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ralph_wiggum::cli::{Cli, Command, OutputFormat, config_path_from_args, generate_after_help, get_log_path};
use ralph_wiggum::config::Config;
use ralph_wiggum::exit_codes;
use ralph_wiggum::llm::{RetryPolicy, create_client};
use ralph_wiggum::progress::TruncatingSummary;
use ralph_wiggum::prompts::PromptLoader;
use ralph_wiggum::r#loop::{LoopController, LoopSettings, RunConfig, RunReport, TerminalOutcome};
use ralph_wiggum::LoopError;
use ralph_wiggum::state::{Checkpoint, CheckpointStore, IterationState};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args(std::env::args());
    let api_key_env = Config::load_api_key_env(config_path.as_ref());
    let cmd = Cli::command().after_help(generate_after_help(&api_key_env));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            std::process::exit(exit_codes::CONFIG);
        }
    };

    debug!(command = ?cli.command, "main: dispatching command");
    let code = match cli.command {
        Command::Run {
            prompt,
            completion_phrase,
            max_iterations,
            task_queue,
            run_id,
            model,
            mode,
        } => {
            debug!(?max_iterations, ?run_id, ?mode, "main: matched Run command");
            let mut run = RunConfig::new(
                prompt,
                completion_phrase.unwrap_or_else(|| config.run.completion_phrase.clone()),
            )
            .with_max_iterations(max_iterations.unwrap_or(config.run.max_iterations))
            .with_task_queue(task_queue.unwrap_or_else(|| config.run.task_queue.clone()))
            .with_mode(mode.fixed())
            .with_model(model);
            if let Some(run_id) = run_id {
                run = run.with_run_id(run_id);
            }
            cmd_run(config, run).await?
        }
        Command::Resume { run_id } => {
            debug!(%run_id, "main: matched Resume command");
            cmd_resume(config, &run_id).await?
        }
        Command::Show { run_id, format } => {
            debug!(%run_id, ?format, "main: matched Show command");
            cmd_show(&config, &run_id, format)?
        }
        Command::List => {
            debug!("main: matched List command");
            cmd_list(&config)?
        }
    };

    debug!(%code, "main: exiting");
    std::process::exit(code)
}

/// Start a new run
async fn cmd_run(mut config: Config, run: RunConfig) -> Result<i32> {
    debug!(run_id = %run.run_id, "cmd_run: called");
    apply_run_overrides(&mut config, &run);
    if let Err(e) = config.validate().and_then(|_| run.validate()) {
        eprintln!("{} {}", "✗".red(), e);
        return Ok(exit_codes::CONFIG);
    }

    let Some(controller) = build_controller(&config)? else {
        return Ok(exit_codes::CONFIG);
    };

    println!("{} Starting {} (max {} iterations)", "▶".cyan(), run.run_id.bold(), run.max_iterations);
    finish(controller.run(run).await)
}

/// Continue a checkpointed run with the mode and model it was started with
async fn cmd_resume(mut config: Config, run_id: &str) -> Result<i32> {
    debug!(%run_id, "cmd_resume: called");
    let checkpoint = match CheckpointStore::new(&config.run.state_dir).load(run_id) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return Ok(exit_codes::ERROR);
        }
    };
    apply_run_overrides(&mut config, &checkpoint.run);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "✗".red(), e);
        return Ok(exit_codes::CONFIG);
    }

    let Some(controller) = build_controller(&config)? else {
        return Ok(exit_codes::CONFIG);
    };

    println!("{} Resuming {}", "▶".cyan(), run_id.bold());
    finish(controller.resume(run_id).await)
}

/// Settings a run carries in its checkpoint take precedence over the config file
fn apply_run_overrides(config: &mut Config, run: &RunConfig) {
    if let Some(model) = &run.model {
        debug!(%model, "apply_run_overrides: model pinned by run");
        config.llm.model = model.clone();
    }
}

/// Wire the controller; `None` when the backend cannot be configured
fn build_controller(config: &Config) -> Result<Option<LoopController>> {
    let client = match create_client(&config.llm, RetryPolicy::from_config(&config.retry)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return Ok(None);
        }
    };

    let prompts = Arc::new(PromptLoader::new(config.prompts_dir.as_deref()));
    let summary = TruncatingSummary::with_limits(config.progress.summary_max_chars, config.progress.entry_max_chars);

    let controller = LoopController::from_client(client, prompts, LoopSettings::from_config(config))
        .with_summary_policy(Arc::new(summary))
        .with_checkpoints(CheckpointStore::new(&config.run.state_dir))
        .with_cancellation(spawn_signal_watcher());
    Ok(Some(controller))
}

fn finish(result: Result<RunReport, LoopError>) -> Result<i32> {
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(report.exit_code())
        }
        Err(e) if e.is_configuration() => {
            eprintln!("{} {}", "✗".red(), e);
            Ok(exit_codes::CONFIG)
        }
        Err(e @ LoopError::RunExists(_)) => {
            eprintln!("{} {}", "✗".red(), e);
            Ok(exit_codes::ERROR)
        }
        Err(e) => Err(e.into()),
    }
}

/// Flip the cancellation flag on Ctrl-C or SIGTERM
fn spawn_signal_watcher() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("Shutdown signal received, stopping at the next iteration boundary");
        eprintln!("{} Stopping after the current iteration...", "⚠".yellow());
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_report(report: &RunReport) {
    match &report.outcome {
        TerminalOutcome::Completed { phrase } => println!(
            "{} Completed after {} iteration(s): <promise>{}</promise>",
            "✓".green(),
            report.iterations_used,
            phrase
        ),
        TerminalOutcome::Exhausted { iterations } => println!(
            "{} Stopped after {} iteration(s) without completion",
            "⚠".yellow(),
            iterations
        ),
        TerminalOutcome::Failed { reason } => println!("{} Failed: {}", "✗".red(), reason),
        TerminalOutcome::Cancelled => println!(
            "{} Cancelled after {} iteration(s); resume with `rw resume {}`",
            "⚠".yellow(),
            report.iterations_used,
            report.run_id
        ),
    }

    if !report.final_response.is_empty() {
        println!();
        println!("{}", "Final response:".bold());
        println!("{}", report.final_response);
    }

    print_state(&report.state);
}

/// Lessons, progress summary, and retained history
fn print_state(state: &IterationState) {
    if !state.lessons.is_empty() {
        println!();
        println!("{}", "Lessons:".bold());
        for lesson in &state.lessons {
            println!("  - {}", lesson);
        }
    }

    if !state.progress_summary.is_empty() {
        println!();
        println!("{}", "Progress summary:".bold());
        println!("{}", state.progress_summary);
    }

    for entry in &state.history {
        println!();
        let marker = if entry.partial { " (interrupted)" } else { "" };
        println!("{}", format!("--- Iteration {}{} ---", entry.iteration, marker).dimmed());
        println!("{}", entry.output);
    }
}

/// Print a checkpointed run
fn cmd_show(config: &Config, run_id: &str, format: OutputFormat) -> Result<i32> {
    debug!(%run_id, ?format, "cmd_show: called");
    let store = CheckpointStore::new(&config.run.state_dir);
    let checkpoint = match store.load(run_id) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return Ok(exit_codes::ERROR);
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
        OutputFormat::Text => print_checkpoint(&checkpoint),
    }
    Ok(exit_codes::OK)
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    let Checkpoint {
        run,
        state,
        segment,
        updated_at,
    } = checkpoint;

    println!("{} {}", "Run:".bold(), run.run_id);
    println!("{} {}", "Prompt:".bold(), run.prompt);
    println!("{} {}", "Completion phrase:".bold(), run.completion_phrase);
    println!("{} {}", "Task queue:".bold(), run.task_queue);
    match run.mode {
        Some(mode) => println!("{} {}", "Mode:".bold(), mode),
        None => println!("{} auto", "Mode:".bold()),
    }
    if let Some(model) = &run.model {
        println!("{} {}", "Model:".bold(), model);
    }
    println!("{} {}", "Status:".bold(), state.terminal);
    println!("{} {}/{}", "Iterations:".bold(), state.iteration_index, run.max_iterations);
    println!("{} {}", "Segments:".bold(), segment);
    println!("{} {}", "Updated:".bold(), updated_at.to_rfc3339());

    print_state(state);
}

/// List checkpointed runs with their status
fn cmd_list(config: &Config) -> Result<i32> {
    debug!("cmd_list: called");
    let store = CheckpointStore::new(&config.run.state_dir);
    let run_ids = store.list()?;
    if run_ids.is_empty() {
        println!("No runs found in {}", store.dir().display());
        return Ok(exit_codes::OK);
    }

    for run_id in run_ids {
        match store.load(&run_id) {
            Ok(checkpoint) => println!(
                "{:<22} {:<24} {:>3}/{:<3} {}",
                run_id,
                checkpoint.state.terminal.to_string(),
                checkpoint.state.iteration_index,
                checkpoint.run.max_iterations,
                checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Err(e) => {
                warn!(%run_id, error = %e, "cmd_list: unreadable checkpoint");
                println!("{:<22} {}", run_id, "unreadable".red());
            }
        }
    }
    Ok(exit_codes::OK)
}
