//! Task expansion - turns the remaining work into ordered sub-task descriptions

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, ToolDefinition};
use crate::prompts::PromptLoader;
use crate::r#loop::RunConfig;
use crate::state::IterationState;

/// Name of the forced tool the planner must call
pub const PLAN_TOOL: &str = "create_plan";

/// Produces the sub-task list for a multi-mode iteration
#[async_trait]
pub trait TaskExpander: Send + Sync {
    /// Ordered task descriptions; may be empty
    async fn expand(&self, state: &IterationState, run: &RunConfig) -> Result<Vec<String>, CollaboratorError>;
}

/// Returns the same task list every time
#[derive(Debug, Clone, Default)]
pub struct StaticExpander {
    tasks: Vec<String>,
}

impl StaticExpander {
    pub fn new<S: Into<String>>(tasks: impl IntoIterator<Item = S>) -> Self {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TaskExpander for StaticExpander {
    async fn expand(&self, _state: &IterationState, _run: &RunConfig) -> Result<Vec<String>, CollaboratorError> {
        debug!(task_count = %self.tasks.len(), "StaticExpander::expand: called");
        Ok(self.tasks.clone())
    }
}

/// Asks the model for a plan through the `create_plan` tool
pub struct LlmTaskExpander {
    client: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct PlanVars<'a> {
    iteration: u32,
    progress_summary: &'a str,
    lessons: &'a [String],
}

/// A plan item is either `{"content": "..."}` or a bare string
#[derive(Deserialize)]
#[serde(untagged)]
enum PlanItem {
    Task { content: String },
    Text(String),
}

impl PlanItem {
    fn into_content(self) -> String {
        match self {
            PlanItem::Task { content } => content,
            PlanItem::Text(text) => text,
        }
    }
}

#[derive(Deserialize)]
struct PlanOutput {
    tasks: Vec<PlanItem>,
}

impl LlmTaskExpander {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<PromptLoader>, max_tokens: u32) -> Self {
        debug!(%max_tokens, "LlmTaskExpander::new: called");
        Self {
            client,
            prompts,
            max_tokens,
        }
    }

    fn build_tool() -> ToolDefinition {
        ToolDefinition::new(
            PLAN_TOOL,
            "Submit the ordered steps for this iteration. Call this once with all steps.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": {
                                    "type": "string",
                                    "description": "One actionable step"
                                }
                            },
                            "required": ["content"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        )
    }

    /// Extract task descriptions; `None` when the response holds no usable plan
    fn parse_plan_response(response: &CompletionResponse) -> Option<Vec<String>> {
        let output = if let Some(call) = response.tool_call(PLAN_TOOL) {
            debug!("parse_plan_response: found plan tool call");
            serde_json::from_value::<PlanOutput>(call.input.clone()).ok()?
        } else if let Some(content) = &response.content {
            // Fallback: plan returned as JSON text
            let content = content.trim();
            serde_json::from_str::<PlanOutput>(content)
                .or_else(|_| serde_json::from_str::<Vec<PlanItem>>(content).map(|tasks| PlanOutput { tasks }))
                .ok()?
        } else {
            return None;
        };

        Some(
            output
                .tasks
                .into_iter()
                .map(PlanItem::into_content)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }
}

#[async_trait]
impl TaskExpander for LlmTaskExpander {
    async fn expand(&self, state: &IterationState, run: &RunConfig) -> Result<Vec<String>, CollaboratorError> {
        debug!(iteration_index = %state.iteration_index, "LlmTaskExpander::expand: called");
        let vars = PlanVars {
            iteration: state.iteration_index + 1,
            progress_summary: &state.progress_summary,
            lessons: &state.lessons,
        };
        let system = self.prompts.render("plan-system", &vars)?;
        let request = CompletionRequest::text(system, run.prompt.clone(), self.max_tokens).with_forced_tool(Self::build_tool());

        let response = self.client.complete(request).await?;
        match Self::parse_plan_response(&response) {
            Some(tasks) => {
                info!(task_count = %tasks.len(), "Plan created");
                Ok(tasks)
            }
            None => {
                warn!("Planner returned a malformed plan; treating it as empty");
                Ok(Vec::new())
            }
        }
    }
}
