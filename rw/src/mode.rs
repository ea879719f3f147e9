//! Per-iteration mode decision
//!
//! Every iteration runs either one task built from the original prompt or a list of
//! sub-tasks from the planner. The decider only reads state. When it cannot decide,
//! the controller falls back to `Mode::Single`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CollaboratorError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, ToolDefinition};
use crate::prompts::PromptLoader;
use crate::r#loop::RunConfig;
use crate::state::IterationState;

const DECIDE_TOOL: &str = "decide_iteration_mode";

/// How an iteration is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One task synthesised from the prompt and progress summary
    Single,
    /// Planner-produced sub-tasks, executed in order
    Multi,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "multi" => Ok(Mode::Multi),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Single => write!(f, "single"),
            Mode::Multi => write!(f, "multi"),
        }
    }
}

/// A decider's answer for one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: Mode,
    /// Optional focus hint for single mode
    pub focus: Option<String>,
    pub rationale: String,
}

impl ModeDecision {
    pub fn new(mode: Mode, rationale: impl Into<String>) -> Self {
        Self {
            mode,
            focus: None,
            rationale: rationale.into(),
        }
    }

    /// The deterministic answer used whenever deciding fails
    pub fn single_fallback(reason: impl std::fmt::Display) -> Self {
        Self::new(Mode::Single, format!("fallback: {}", reason))
    }
}

/// Chooses single or multi mode for the next iteration
#[async_trait]
pub trait ModeDecider: Send + Sync {
    async fn decide(&self, state: &IterationState, run: &RunConfig) -> Result<ModeDecision, CollaboratorError>;
}

/// Always answers with the same mode
#[derive(Debug, Clone, Copy)]
pub struct FixedMode(pub Mode);

#[async_trait]
impl ModeDecider for FixedMode {
    async fn decide(&self, _state: &IterationState, _run: &RunConfig) -> Result<ModeDecision, CollaboratorError> {
        debug!(mode = %self.0, "FixedMode::decide: called");
        Ok(ModeDecision::new(self.0, "fixed by configuration"))
    }
}

/// Asks the model to judge whether the remaining work should be split
pub struct LlmModeDecider {
    client: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct DecideVars<'a> {
    prompt: &'a str,
    iteration: u32,
    progress_summary: &'a str,
    last_output: Option<&'a str>,
}

#[derive(Deserialize)]
struct DecideOutput {
    mode: String,
    #[serde(default)]
    single_task_content: String,
    #[serde(default)]
    rationale: String,
}

impl LlmModeDecider {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<PromptLoader>, max_tokens: u32) -> Self {
        debug!(%max_tokens, "LlmModeDecider::new: called");
        Self {
            client,
            prompts,
            max_tokens,
        }
    }

    fn build_tool() -> ToolDefinition {
        ToolDefinition::new(
            DECIDE_TOOL,
            "Decide how the next iteration should run",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "mode": { "type": "string", "enum": ["single", "multi"] },
                    "single_task_content": { "type": "string" },
                    "rationale": { "type": "string" }
                },
                "required": ["mode", "rationale"]
            }),
        )
    }

    fn parse_response(response: &CompletionResponse) -> Result<ModeDecision, LlmError> {
        let output: DecideOutput = if let Some(call) = response.tool_call(DECIDE_TOOL) {
            debug!("parse_response: found decide tool call");
            serde_json::from_value(call.input.clone())?
        } else if let Some(content) = &response.content
            && let Ok(output) = serde_json::from_str::<DecideOutput>(content.trim())
        {
            debug!("parse_response: parsed decision from content");
            output
        } else {
            return Err(LlmError::InvalidResponse("model did not return a mode decision".to_string()));
        };

        let mode = Mode::from_str(&output.mode).map_err(LlmError::InvalidResponse)?;
        let focus = Some(output.single_task_content.trim().to_string()).filter(|s| mode == Mode::Single && !s.is_empty());
        Ok(ModeDecision {
            mode,
            focus,
            rationale: output.rationale,
        })
    }
}

#[async_trait]
impl ModeDecider for LlmModeDecider {
    async fn decide(&self, state: &IterationState, run: &RunConfig) -> Result<ModeDecision, CollaboratorError> {
        debug!(iteration_index = %state.iteration_index, "LlmModeDecider::decide: called");
        let vars = DecideVars {
            prompt: &run.prompt,
            iteration: state.iteration_index + 1,
            progress_summary: &state.progress_summary,
            last_output: state.last_output(),
        };
        let system = self.prompts.render("mode-system", &serde_json::json!({}))?;
        let user = self.prompts.render("mode-user", &vars)?;

        let request = CompletionRequest {
            system_prompt: system,
            messages: vec![Message::user(user)],
            tools: vec![],
            tool_choice: None,
            max_tokens: self.max_tokens.min(1024),
        }
        .with_forced_tool(Self::build_tool());

        let response = self.client.complete(request).await?;
        let decision = Self::parse_response(&response)?;
        info!(mode = %decision.mode, rationale = %decision.rationale, "Mode decided");
        Ok(decision)
    }
}
