//! Task execution
//!
//! A task is one unit of model work inside an iteration. The executor sees the run
//! context plus everything earlier tasks in the same iteration produced, through
//! [`TaskContext`]. Retries happen below this layer, in the backend client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::completion::extract_lessons;
use crate::error::CollaboratorError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::mode::Mode;
use crate::prompts::PromptLoader;
use crate::r#loop::RunConfig;
use crate::state::{HistoryEntry, IterationState};

/// Outcome of one executed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    /// Placeholder for an empty plan; nothing was sent to the backend
    Skipped,
    Failed,
}

/// Result attached to a task once it has run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub text: String,
    pub status: TaskStatus,
}

/// One unit of work within an iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,

    /// 1-based position within the iteration
    pub position: usize,

    /// Number of tasks in the iteration
    pub total: usize,

    /// Produces empty output without calling the backend
    #[serde(default)]
    pub noop: bool,

    pub result: Option<TaskResult>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>, position: usize, total: usize) -> Self {
        Self {
            description: description.into(),
            position,
            total,
            noop: false,
            result: None,
        }
    }

    /// The stand-in task for an expansion that produced nothing
    pub fn noop() -> Self {
        Self {
            description: String::new(),
            position: 1,
            total: 1,
            noop: true,
            result: None,
        }
    }

    /// Build the ordered task list for a multi-mode iteration
    pub fn from_plan(descriptions: Vec<String>) -> Vec<Self> {
        if descriptions.is_empty() {
            debug!("TaskSpec::from_plan: empty plan, using no-op task");
            return vec![Self::noop()];
        }
        let total = descriptions.len();
        descriptions
            .into_iter()
            .enumerate()
            .map(|(i, d)| Self::new(d, i + 1, total))
            .collect()
    }

    /// The one task of a single-mode iteration
    ///
    /// The progress summary reaches the executor through the context, so the
    /// description is the prompt plus the optional focus hint.
    pub fn single(run: &RunConfig, focus: Option<&str>) -> Self {
        let description = match focus {
            Some(focus) => format!("{}\n\nFocus for this iteration: {}", run.prompt, focus),
            None => run.prompt.clone(),
        };
        Self::new(description, 1, 1)
    }
}

/// What a task produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub text: String,
    pub lessons: Vec<String>,
}

/// Everything a task may read; grows as earlier tasks in the iteration finish
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub prompt: String,
    pub completion_phrase: String,
    /// 1-based iteration number
    pub iteration: u32,
    pub max_iterations: u32,
    pub mode: Mode,
    pub progress_summary: String,
    pub history: Vec<HistoryEntry>,
    /// Carried lessons followed by lessons from earlier tasks in this iteration
    pub lessons: Vec<String>,
    /// Outputs of earlier tasks in this iteration
    pub earlier_steps: Vec<String>,
}

impl TaskContext {
    pub fn new(run: &RunConfig, state: &IterationState, mode: Mode) -> Self {
        debug!(iteration_index = %state.iteration_index, %mode, "TaskContext::new: called");
        Self {
            prompt: run.prompt.clone(),
            completion_phrase: run.completion_phrase.clone(),
            iteration: state.iteration_index + 1,
            max_iterations: run.max_iterations,
            mode,
            progress_summary: state.progress_summary.clone(),
            history: state.history.iter().cloned().collect(),
            lessons: state.lessons.clone(),
            earlier_steps: Vec::new(),
        }
    }

    /// Make a finished task's output and lessons visible to the tasks after it
    pub fn absorb(&mut self, output: &TaskOutput) {
        debug!(
            text_len = %output.text.len(),
            lesson_count = %output.lessons.len(),
            "TaskContext::absorb: called"
        );
        if !output.text.is_empty() {
            self.earlier_steps.push(output.text.clone());
        }
        self.lessons.extend(output.lessons.iter().cloned());
    }
}

/// Runs one task against the backend
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &TaskSpec, ctx: &TaskContext) -> Result<TaskOutput, CollaboratorError>;
}

/// Template variables shared by the system and user turns
#[derive(Serialize)]
struct ExecuteVars<'a> {
    #[serde(flatten)]
    ctx: &'a TaskContext,
    task: &'a str,
    step_index: usize,
    step_total: usize,
    continuation: bool,
}

/// Executes a task with one completion call
pub struct LlmTaskExecutor {
    client: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    max_tokens: u32,
}

impl LlmTaskExecutor {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<PromptLoader>, max_tokens: u32) -> Self {
        debug!(%max_tokens, "LlmTaskExecutor::new: called");
        Self {
            client,
            prompts,
            max_tokens,
        }
    }
}

#[async_trait]
impl TaskExecutor for LlmTaskExecutor {
    async fn execute(&self, task: &TaskSpec, ctx: &TaskContext) -> Result<TaskOutput, CollaboratorError> {
        debug!(position = %task.position, total = %task.total, noop = %task.noop, "LlmTaskExecutor::execute: called");
        if task.noop {
            debug!("LlmTaskExecutor::execute: no-op task");
            return Ok(TaskOutput::default());
        }

        let vars = ExecuteVars {
            ctx,
            task: &task.description,
            step_index: task.position,
            step_total: task.total,
            continuation: ctx.iteration > 1,
        };
        let system_template = match ctx.mode {
            Mode::Single => "iteration-system",
            Mode::Multi => "step-system",
        };
        let system = self.prompts.render(system_template, &vars)?;
        let user = self.prompts.render("task-user", &vars)?;

        let response = self
            .client
            .complete(CompletionRequest::text(system, user, self.max_tokens))
            .await?;

        let text = response.text().to_string();
        let lessons = extract_lessons(&text);
        info!(
            position = %task.position,
            output_len = %text.len(),
            lesson_count = %lessons.len(),
            "Task executed"
        );
        Ok(TaskOutput { text, lessons })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use crate::llm::client::mock::MockLlmClient;

    fn executor(responses: Vec<CompletionResponse>) -> (LlmTaskExecutor, Arc<MockLlmClient>) {
        let mock = Arc::new(MockLlmClient::new(responses));
        let executor = LlmTaskExecutor::new(mock.clone(), Arc::new(PromptLoader::embedded_only()), 4096);
        (executor, mock)
    }

    #[test]
    fn test_from_plan_numbers_tasks() {
        let tasks = TaskSpec::from_plan(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[1].position, tasks[1].total), (2, 2));
        assert!(!tasks[0].noop);
    }

    #[test]
    fn test_from_empty_plan_is_single_noop() {
        let tasks = TaskSpec::from_plan(vec![]);
        assert_eq!(tasks, vec![TaskSpec::noop()]);
    }

    #[test]
    fn test_single_task_includes_focus() {
        let run = RunConfig::new("write X", "DONE");
        assert_eq!(TaskSpec::single(&run, None).description, "write X");
        assert!(TaskSpec::single(&run, Some("tests")).description.ends_with("Focus for this iteration: tests"));
    }

    #[test]
    fn test_context_absorb() {
        let run = RunConfig::new("p", "DONE");
        let mut state = IterationState::new();
        state.lessons.push("old".to_string());
        let mut ctx = TaskContext::new(&run, &state, Mode::Multi);

        ctx.absorb(&TaskOutput {
            text: "step one done".to_string(),
            lessons: vec!["new".to_string()],
        });
        ctx.absorb(&TaskOutput::default());

        assert_eq!(ctx.earlier_steps, vec!["step one done"]);
        assert_eq!(ctx.lessons, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_noop_skips_backend() {
        let (executor, mock) = executor(vec![]);
        let ctx = TaskContext::new(&RunConfig::new("p", "DONE"), &IterationState::new(), Mode::Multi);

        let out = executor.execute(&TaskSpec::noop(), &ctx).await.unwrap();

        assert_eq!(out, TaskOutput::default());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_single_task_prompt_and_lessons() {
        let (executor, mock) = executor(vec![CompletionResponse::from_text(
            "draft\n<improvements>\n- check edge cases\n</improvements>",
        )]);
        let run = RunConfig::new("write X", "DONE").with_max_iterations(4);
        let ctx = TaskContext::new(&run, &IterationState::new(), Mode::Single);

        let out = executor.execute(&TaskSpec::single(&run, None), &ctx).await.unwrap();

        assert_eq!(out.lessons, vec!["check edge cases"]);
        let req = &mock.requests()[0];
        assert!(req.system_prompt.contains("iteration 1 of at most 4"));
        assert!(req.system_prompt.contains("<promise>DONE</promise>"));
        assert!(req.messages[0].content.starts_with("write X"));
        assert!(!req.messages[0].content.contains("[This is iteration"));
    }

    #[tokio::test]
    async fn test_multi_step_sees_earlier_steps() {
        let (executor, mock) = executor(vec![CompletionResponse::from_text("ok")]);
        let run = RunConfig::new("build it", "DONE");
        let mut state = IterationState::new();
        state.record_iteration(
            "first try",
            &crate::completion::Verdict::NotCompleted { lessons: vec![] },
        );
        let mut ctx = TaskContext::new(&run, &state, Mode::Multi);
        ctx.absorb(&TaskOutput {
            text: "parser written".to_string(),
            lessons: vec!["use checked_div".to_string()],
        });

        executor.execute(&TaskSpec::new("write tests", 2, 2), &ctx).await.unwrap();

        let req = &mock.requests()[0];
        assert!(req.system_prompt.contains("Task 2/2: write tests"));
        let user = &req.messages[0].content;
        assert!(user.contains("parser written"));
        assert!(user.contains("- use checked_div"));
        assert!(user.contains("### Iteration 1\nfirst try"));
        assert!(user.contains("[This is iteration 2."));
    }
}
