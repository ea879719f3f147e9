//! Run and loop configuration types

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, ProgressConfig};
use crate::error::ConfigError;
use crate::mode::Mode;

/// Default iteration budget for a run
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default queue identity recorded with a run
pub const DEFAULT_TASK_QUEUE: &str = "ralph-wiggum-queue";

/// Immutable inputs of one run, fixed at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Identifier used for checkpoints and `rw show`
    pub run_id: String,

    /// The original task prompt
    pub prompt: String,

    /// Literal phrase expected inside `<promise>…</promise>`
    pub completion_phrase: String,

    /// Iteration budget
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Queue identity recorded with the run
    #[serde(default = "default_task_queue")]
    pub task_queue: String,

    /// Mode pinned for every iteration; `None` lets the decider choose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    /// Model override that outlives the process that started the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_task_queue() -> String {
    DEFAULT_TASK_QUEUE.to_string()
}

impl RunConfig {
    /// New run with a generated id and default budget
    pub fn new(prompt: impl Into<String>, completion_phrase: impl Into<String>) -> Self {
        let run_id = Self::generate_run_id();
        debug!(%run_id, "RunConfig::new: called");
        Self {
            run_id,
            prompt: prompt.into(),
            completion_phrase: completion_phrase.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            mode: None,
            model: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// `ralph-loop-` followed by eight hex characters
    pub fn generate_run_id() -> String {
        let hex = uuid::Uuid::now_v7().simple().to_string();
        // v7 leads with a timestamp; the tail is random
        format!("ralph-loop-{}", &hex[hex.len() - 8..])
    }

    /// Check the invariants a run must satisfy before its first iteration
    pub fn validate(&self) -> Result<(), ConfigError> {
        debug!(run_id = %self.run_id, "RunConfig::validate: called");
        if self.prompt.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }
        if self.completion_phrase.is_empty() {
            return Err(ConfigError::EmptyCompletionPhrase);
        }
        if self.max_iterations < 1 {
            return Err(ConfigError::InvalidMaxIterations(self.max_iterations));
        }
        Ok(())
    }
}

/// Controller tuning that is not part of the carried state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Maximum transcripts kept verbatim in history
    pub history_cap: usize,

    /// Iterations per segment before a continue-as-new restart
    pub segment_iterations: u32,

    /// Max tokens requested per backend call
    pub max_tokens: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_progress(&ProgressConfig::default(), 4096)
    }
}

impl LoopSettings {
    pub fn from_progress(progress: &ProgressConfig, max_tokens: u32) -> Self {
        debug!(?progress, %max_tokens, "LoopSettings::from_progress: called");
        Self {
            history_cap: progress.history_cap,
            segment_iterations: progress.segment_iterations,
            max_tokens,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::from_progress(&config.progress, config.llm.max_tokens)
    }

    pub fn with_history_cap(mut self, history_cap: usize) -> Self {
        self.history_cap = history_cap;
        self
    }

    pub fn with_segment_iterations(mut self, segment_iterations: u32) -> Self {
        self.segment_iterations = segment_iterations;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_cap == 0 {
            return Err(ConfigError::InvalidHistoryCap);
        }
        if self.segment_iterations == 0 {
            return Err(ConfigError::InvalidSegmentIterations);
        }
        Ok(())
    }
}
