//! Ralph Wiggum - iterative prompt loop with durable restarts
//!
//! A run repeatedly hands the same prompt to a model, feeding back a bounded record of
//! what earlier iterations produced, until the model emits the agreed completion marker
//! or the iteration budget runs out.
//!
//! # Core Concepts
//!
//! - **Bounded context**: recent transcripts are kept verbatim, older ones folded into a summary
//! - **Restart transparency**: only the serialized state crosses a segment boundary
//! - **Exact completion**: `<promise>PHRASE</promise>` must match the configured phrase
//! - **Lessons**: `<improvements>` notes are carried forward into every later prompt
//!
//! # Modules
//!
//! - [`r#loop`] - Loop controller, run configuration, and outcomes
//! - [`state`] - Carried iteration state and checkpoints
//! - [`mode`] - Single/multi mode decision
//! - [`planning`] - Task expansion for multi mode
//! - [`executor`] - Task execution
//! - [`completion`] - Completion marker detection and lesson extraction
//! - [`progress`] - History folding policies
//! - [`llm`] - Backend client trait, Anthropic implementation, retries
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod llm;
pub mod r#loop;
pub mod mode;
pub mod planning;
pub mod progress;
pub mod prompts;
pub mod state;

pub use completion::{CompletionEvaluator, PromiseEvaluator, Verdict};
pub use config::Config;
pub use error::{CollaboratorError, ConfigError, LoopError};
pub use executor::{LlmTaskExecutor, TaskContext, TaskExecutor, TaskOutput, TaskSpec};
pub use mode::{FixedMode, LlmModeDecider, Mode, ModeDecider, ModeDecision};
pub use planning::{LlmTaskExpander, StaticExpander, TaskExpander};
pub use r#loop::{IterationResult, LoopController, LoopSettings, RunConfig, RunReport, Step, TerminalOutcome};
pub use state::{Checkpoint, CheckpointStore, HistoryEntry, IterationState, Terminal};
