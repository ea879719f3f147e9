//! IterationState - the carried state of a run
//!
//! This is the only thing that crosses a restart boundary. Everything a fresh segment
//! needs to continue the run must be reconstructible from its serialized form.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::completion::Verdict;
use crate::progress::SummaryPolicy;

/// Failure reason recorded when a run is cancelled at an iteration boundary
pub const CANCELLED_REASON: &str = "cancelled";

/// One iteration's transcript as kept in the bounded history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 1-based iteration number that produced this output
    pub iteration: u32,

    /// Concatenated task outputs, in execution order
    pub output: String,

    /// The iteration failed before all of its tasks ran
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl HistoryEntry {
    pub fn new(iteration: u32, output: impl Into<String>) -> Self {
        Self {
            iteration,
            output: output.into(),
            partial: false,
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Terminal {
    #[default]
    None,
    Completed,
    Exhausted,
    Failed {
        reason: String,
    },
}

impl Terminal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Terminal::None)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Terminal::Failed { reason } if reason == CANCELLED_REASON)
    }
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminal::None => write!(f, "running"),
            Terminal::Completed => write!(f, "completed"),
            Terminal::Exhausted => write!(f, "exhausted"),
            Terminal::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Carried state, mutated once per iteration by the active segment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IterationState {
    /// Completed iterations so far; also the 0-based index of the next one
    pub iteration_index: u32,

    /// Bounded distillation of every transcript evicted from `history`
    pub progress_summary: String,

    /// Most recent transcripts, oldest first
    pub history: VecDeque<HistoryEntry>,

    /// Lessons carried forward verbatim, in the order they were produced
    pub lessons: Vec<String>,

    pub terminal: Terminal,

    /// Set only when `terminal` is `Completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_phrase: Option<String>,
}

impl IterationState {
    /// Fresh state for a new run
    pub fn new() -> Self {
        debug!("IterationState::new: called");
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_terminal()
    }

    /// Output of the most recent iteration, if any
    pub fn last_output(&self) -> Option<&str> {
        self.history.back().map(|e| e.output.as_str())
    }

    /// Merge one finished iteration's output and verdict
    ///
    /// Appends the transcript, carries lessons forward when the iteration fell short, and
    /// advances the index. A completed verdict makes the state terminal.
    pub fn record_iteration(&mut self, produced: &str, verdict: &Verdict) {
        debug!(
            iteration_index = %self.iteration_index,
            produced_len = %produced.len(),
            "IterationState::record_iteration: called"
        );
        self.history.push_back(HistoryEntry::new(self.iteration_index + 1, produced));
        match verdict {
            Verdict::Completed { phrase } => {
                debug!(%phrase, "IterationState::record_iteration: completed");
                self.terminal = Terminal::Completed;
                self.completion_phrase = Some(phrase.clone());
            }
            Verdict::NotCompleted { lessons } => {
                debug!(lesson_count = %lessons.len(), "IterationState::record_iteration: not completed");
                self.lessons.extend(lessons.iter().cloned());
            }
        }
        self.iteration_index += 1;
    }

    /// Record a collaborator failure, keeping whatever the iteration produced before it
    pub fn record_failure(&mut self, partial_output: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(%reason, partial_len = %partial_output.len(), "IterationState::record_failure: called");
        if !partial_output.is_empty() {
            self.history.push_back(HistoryEntry {
                iteration: self.iteration_index + 1,
                output: partial_output.to_string(),
                partial: true,
            });
        }
        self.terminal = Terminal::Failed { reason };
    }

    pub fn mark_exhausted(&mut self) {
        debug!(iteration_index = %self.iteration_index, "IterationState::mark_exhausted: called");
        self.terminal = Terminal::Exhausted;
    }

    pub fn mark_cancelled(&mut self) {
        debug!(iteration_index = %self.iteration_index, "IterationState::mark_cancelled: called");
        self.terminal = Terminal::Failed {
            reason: CANCELLED_REASON.to_string(),
        };
    }

    /// Fold the oldest transcripts into the summary until history fits `cap`
    ///
    /// Returns how many entries were folded. Lessons are never touched.
    pub fn fold_history(&mut self, cap: usize, policy: &dyn SummaryPolicy) -> usize {
        if self.history.len() <= cap {
            debug!(history_len = %self.history.len(), %cap, "IterationState::fold_history: within cap");
            return 0;
        }

        let excess = self.history.len() - cap;
        let evicted: Vec<HistoryEntry> = self.history.drain(..excess).collect();
        debug!(%excess, "IterationState::fold_history: folding oldest entries");
        self.progress_summary = policy.fold(&self.progress_summary, &evicted);
        excess
    }

    /// Serialize for a restart hand-off or checkpoint
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Rebuild state from its serialized form
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
