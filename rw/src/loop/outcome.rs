//! Terminal outcomes and run reports

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::completion::Verdict;
use crate::exit_codes;
use crate::executor::TaskSpec;
use crate::mode::Mode;
use crate::state::{IterationState, Terminal};

use super::RunConfig;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed { phrase: String },
    Exhausted { iterations: u32 },
    Failed { reason: String },
    Cancelled,
}

impl TerminalOutcome {
    /// Outcome implied by a state, or `None` while the run is still going
    pub fn from_state(state: &IterationState) -> Option<Self> {
        match &state.terminal {
            Terminal::None => None,
            Terminal::Completed => Some(TerminalOutcome::Completed {
                phrase: state.completion_phrase.clone().unwrap_or_default(),
            }),
            Terminal::Exhausted => Some(TerminalOutcome::Exhausted {
                iterations: state.iteration_index,
            }),
            Terminal::Failed { .. } if state.terminal.is_cancelled() => Some(TerminalOutcome::Cancelled),
            Terminal::Failed { reason } => Some(TerminalOutcome::Failed { reason: reason.clone() }),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalOutcome::Completed { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalOutcome::Completed { .. } => exit_codes::OK,
            TerminalOutcome::Exhausted { .. } => exit_codes::EXHAUSTED,
            TerminalOutcome::Failed { .. } => exit_codes::FAILED,
            TerminalOutcome::Cancelled => exit_codes::CANCELLED,
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalOutcome::Completed { phrase } => write!(f, "completed ({})", phrase),
            TerminalOutcome::Exhausted { iterations } => write!(f, "exhausted after {} iterations", iterations),
            TerminalOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            TerminalOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What one iteration did, for logging and inspection
#[derive(Debug, Clone)]
pub struct IterationResult {
    /// 1-based iteration number
    pub iteration: u32,
    pub mode: Mode,
    pub rationale: String,
    /// Tasks in execution order, with their results attached
    pub tasks: Vec<TaskSpec>,
    pub produced: String,
    pub verdict: Verdict,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: TerminalOutcome,
    pub iterations_used: u32,
    pub final_response: String,
    pub completion_detected: bool,
    pub state: IterationState,
}

impl RunReport {
    pub fn new(run: &RunConfig, outcome: TerminalOutcome, state: IterationState) -> Self {
        Self {
            run_id: run.run_id.clone(),
            completion_detected: outcome.is_completed(),
            iterations_used: state.iteration_index,
            final_response: state.last_output().unwrap_or_default().to_string(),
            outcome,
            state,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}
