//! LoopController - drives iterations until completion, exhaustion, or failure
//!
//! A run is a chain of segments. Each segment executes iterations until a restart
//! boundary, then hands the serialized state to a fresh segment (continue-as-new).
//! Nothing but [`IterationState`] crosses a boundary, so a run is indistinguishable
//! whether it restarted after every iteration or never.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::completion::{CompletionEvaluator, PromiseEvaluator, Verdict};
use crate::error::{CollaboratorError, LoopError};
use crate::executor::{LlmTaskExecutor, TaskContext, TaskExecutor, TaskResult, TaskSpec, TaskStatus};
use crate::llm::LlmClient;
use crate::mode::{FixedMode, LlmModeDecider, Mode, ModeDecider, ModeDecision};
use crate::planning::{LlmTaskExpander, TaskExpander};
use crate::progress::{SummaryPolicy, TruncatingSummary};
use crate::prompts::PromptLoader;
use crate::state::{Checkpoint, CheckpointStore, IterationState};

use super::{IterationResult, LoopSettings, RunConfig, RunReport, TerminalOutcome};

/// Result of advancing a run by one iteration
#[derive(Debug, Clone)]
pub struct Step {
    pub state: IterationState,
    /// The segment should end and hand off after this step
    pub restart: bool,
    pub outcome: Option<TerminalOutcome>,
    /// `None` when no iteration body ran (budget already spent)
    pub result: Option<IterationResult>,
}

impl Step {
    fn finished(state: IterationState, result: Option<IterationResult>) -> Self {
        Self {
            outcome: TerminalOutcome::from_state(&state),
            state,
            restart: false,
            result,
        }
    }
}

/// Owns the collaborators and runs the iteration loop
pub struct LoopController {
    decider: Arc<dyn ModeDecider>,
    expander: Arc<dyn TaskExpander>,
    executor: Arc<dyn TaskExecutor>,
    evaluator: Arc<dyn CompletionEvaluator>,
    summary: Arc<dyn SummaryPolicy>,
    settings: LoopSettings,
    checkpoints: Option<CheckpointStore>,
    cancel: Option<watch::Receiver<bool>>,
}

impl LoopController {
    pub fn new(
        decider: Arc<dyn ModeDecider>,
        expander: Arc<dyn TaskExpander>,
        executor: Arc<dyn TaskExecutor>,
        settings: LoopSettings,
    ) -> Self {
        debug!(?settings, "LoopController::new: called");
        Self {
            decider,
            expander,
            executor,
            evaluator: Arc::new(PromiseEvaluator),
            summary: Arc::new(TruncatingSummary::default()),
            settings,
            checkpoints: None,
            cancel: None,
        }
    }

    /// Wire every collaborator to one backend client
    pub fn from_client(client: Arc<dyn LlmClient>, prompts: Arc<PromptLoader>, settings: LoopSettings) -> Self {
        let max_tokens = settings.max_tokens;
        Self::new(
            Arc::new(LlmModeDecider::new(client.clone(), prompts.clone(), max_tokens)),
            Arc::new(LlmTaskExpander::new(client.clone(), prompts.clone(), max_tokens)),
            Arc::new(LlmTaskExecutor::new(client, prompts, max_tokens)),
            settings,
        )
    }

    pub fn with_mode_decider(mut self, decider: Arc<dyn ModeDecider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn CompletionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_summary_policy(mut self, summary: Arc<dyn SummaryPolicy>) -> Self {
        self.summary = summary;
        self
    }

    /// Commit state durably at every segment boundary
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Stop at the next iteration boundary once the channel reads `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Start a new run from empty state
    ///
    /// Refuses a run id that already has a checkpoint; such runs continue through [`Self::resume`].
    pub async fn run(&self, run: RunConfig) -> Result<RunReport, LoopError> {
        info!(run_id = %run.run_id, max_iterations = %run.max_iterations, "Starting run");
        run.validate()?;
        self.settings.validate()?;

        let state = IterationState::new();
        if let Some(store) = &self.checkpoints {
            store.create(&Checkpoint::new(&run, &state, 0))?;
        }
        self.drive(&run, state, 0).await
    }

    /// Continue a run from its last committed checkpoint
    ///
    /// A run that already ended is reported as-is. A cancelled run picks up where it stopped.
    pub async fn resume(&self, run_id: &str) -> Result<RunReport, LoopError> {
        debug!(%run_id, "LoopController::resume: called");
        self.settings.validate()?;
        let store = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| LoopError::UnknownRun(run_id.to_string()))?;
        let Checkpoint {
            run, mut state, segment, ..
        } = store.load(run_id)?;

        if state.terminal.is_cancelled() {
            info!(%run_id, iteration_index = %state.iteration_index, "Resuming cancelled run");
            state.terminal = Default::default();
        }
        if let Some(outcome) = TerminalOutcome::from_state(&state) {
            info!(%run_id, %outcome, "Run already finished");
            return Ok(RunReport::new(&run, outcome, state));
        }

        info!(%run_id, iteration_index = %state.iteration_index, %segment, "Resuming run");
        self.drive(&run, state, segment).await
    }

    /// Run segments back to back until the run ends
    async fn drive(&self, run: &RunConfig, mut state: IterationState, mut segment: u32) -> Result<RunReport, LoopError> {
        loop {
            let (ended, outcome) = self.run_segment(run, state).await;
            if let Some(outcome) = outcome {
                self.commit(run, &ended, segment + 1)?;
                info!(run_id = %run.run_id, %outcome, iterations = %ended.iteration_index, "Run finished");
                return Ok(RunReport::new(run, outcome, ended));
            }
            segment += 1;
            state = self.hand_off(run, &ended, segment)?;
        }
    }

    /// Execute iterations until a restart boundary or a terminal outcome
    pub async fn run_segment(&self, run: &RunConfig, mut state: IterationState) -> (IterationState, Option<TerminalOutcome>) {
        debug!(iteration_index = %state.iteration_index, "LoopController::run_segment: called");
        loop {
            if self.is_cancelled() {
                info!(run_id = %run.run_id, iteration_index = %state.iteration_index, "Cancellation requested");
                state.mark_cancelled();
                return (state, Some(TerminalOutcome::Cancelled));
            }

            let step = self.step(state, run).await;
            state = step.state;
            if step.outcome.is_some() {
                return (state, step.outcome);
            }
            if step.restart {
                debug!(iteration_index = %state.iteration_index, "run_segment: restart boundary");
                return (state, None);
            }
        }
    }

    /// Serialize the state, commit it if a store is configured, and rebuild it for the next segment
    pub fn hand_off(&self, run: &RunConfig, state: &IterationState, segment: u32) -> Result<IterationState, LoopError> {
        debug!(iteration_index = %state.iteration_index, %segment, "LoopController::hand_off: called");
        let bytes = state.to_json()?;
        self.commit(run, state, segment)?;
        Ok(IterationState::from_json(&bytes)?)
    }

    fn commit(&self, run: &RunConfig, state: &IterationState, segment: u32) -> Result<(), LoopError> {
        if let Some(store) = &self.checkpoints {
            store.commit(&Checkpoint::new(run, state, segment))?;
        }
        Ok(())
    }

    /// Advance the run by one iteration
    ///
    /// Never returns an error: collaborator failures become a failed terminal state
    /// that keeps whatever the iteration produced before the failure.
    pub async fn step(&self, mut state: IterationState, run: &RunConfig) -> Step {
        debug!(iteration_index = %state.iteration_index, "LoopController::step: called");
        if state.is_terminal() {
            return Step::finished(state, None);
        }
        if state.iteration_index >= run.max_iterations {
            info!(run_id = %run.run_id, max_iterations = %run.max_iterations, "Iteration budget exhausted");
            state.mark_exhausted();
            return Step::finished(state, None);
        }

        let iteration = state.iteration_index + 1;
        info!(run_id = %run.run_id, "Iteration {}/{}", iteration, run.max_iterations);

        let pinned = run.mode.map(FixedMode);
        let decider: &dyn ModeDecider = match &pinned {
            Some(fixed) => fixed,
            None => self.decider.as_ref(),
        };
        let decision = match decider.decide(&state, run).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Mode decision failed, falling back to single mode");
                ModeDecision::single_fallback(&e)
            }
        };

        let mut tasks = match decision.mode {
            Mode::Single => vec![TaskSpec::single(run, decision.focus.as_deref())],
            Mode::Multi => match self.expander.expand(&state, run).await {
                Ok(descriptions) => TaskSpec::from_plan(descriptions),
                Err(e) => {
                    let reason = Self::failure_reason("expand tasks", e);
                    state.record_failure("", reason);
                    self.fold(&mut state);
                    return Step::finished(state, None);
                }
            },
        };
        debug!(mode = %decision.mode, task_count = %tasks.len(), "step: tasks ready");

        let mut ctx = TaskContext::new(run, &state, decision.mode);
        let mut outputs: Vec<String> = Vec::with_capacity(tasks.len());
        let mut failure = None;
        for task in tasks.iter_mut() {
            match self.executor.execute(task, &ctx).await {
                Ok(output) => {
                    task.result = Some(TaskResult {
                        text: output.text.clone(),
                        status: if task.noop { TaskStatus::Skipped } else { TaskStatus::Succeeded },
                    });
                    ctx.absorb(&output);
                    outputs.push(output.text);
                }
                Err(e) => {
                    task.result = Some(TaskResult {
                        text: String::new(),
                        status: TaskStatus::Failed,
                    });
                    failure = Some(Self::failure_reason("execute task", e));
                    break;
                }
            }
        }

        if let Some(reason) = failure {
            let partial = outputs.join("\n\n");
            state.record_failure(&partial, reason);
            self.fold(&mut state);
            let result = IterationResult {
                iteration,
                mode: decision.mode,
                rationale: decision.rationale,
                tasks,
                produced: partial,
                verdict: Verdict::NotCompleted { lessons: vec![] },
            };
            return Step::finished(state, Some(result));
        }

        let produced = outputs.join("\n\n");
        let verdict = self.evaluator.evaluate(&produced, run).await;
        state.record_iteration(&produced, &verdict);
        self.fold(&mut state);
        let result = IterationResult {
            iteration,
            mode: decision.mode,
            rationale: decision.rationale,
            tasks,
            produced,
            verdict,
        };

        if result.verdict.is_completed() {
            info!(run_id = %run.run_id, %iteration, "Completion detected");
            return Step::finished(state, Some(result));
        }

        let restart = state.iteration_index % self.settings.segment_iterations == 0
            && state.iteration_index < run.max_iterations;
        Step {
            state,
            restart,
            outcome: None,
            result: Some(result),
        }
    }

    /// Keep history within the cap before the state can be committed
    fn fold(&self, state: &mut IterationState) {
        let folded = state.fold_history(self.settings.history_cap, self.summary.as_ref());
        if folded > 0 {
            debug!(%folded, "fold: folded history into summary");
        }
    }

    fn failure_reason(operation: &'static str, source: CollaboratorError) -> String {
        let err = LoopError::collaborator(operation, source);
        warn!(error = %err, "Collaborator failed after retries");
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::planning::StaticExpander;
    use crate::executor::TaskOutput;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outputs and records the context each task saw
    struct ScriptedExecutor {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<TaskContext>>,
    }

    impl ScriptedExecutor {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(|e| LlmError::InvalidResponse(e.to_string())))
                .collect();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<TaskContext> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, task: &TaskSpec, ctx: &TaskContext) -> Result<crate::executor::TaskOutput, CollaboratorError> {
            self.seen.lock().unwrap().push(ctx.clone());
            if task.noop {
                return Ok(TaskOutput::default());
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))?;
            Ok(TaskOutput {
                lessons: crate::completion::extract_lessons(&reply),
                text: reply,
            })
        }
    }

    struct FailingDecider;

    #[async_trait]
    impl ModeDecider for FailingDecider {
        async fn decide(&self, _state: &IterationState, _run: &RunConfig) -> Result<ModeDecision, CollaboratorError> {
            Err(LlmError::InvalidResponse("decider down".to_string()).into())
        }
    }

    fn controller(mode: Mode, tasks: &[&str], executor: Arc<ScriptedExecutor>, settings: LoopSettings) -> LoopController {
        LoopController::new(
            Arc::new(FixedMode(mode)),
            Arc::new(StaticExpander::new(tasks.iter().copied())),
            executor,
            settings,
        )
    }

    fn single(replies: Vec<Result<&str, &str>>) -> (LoopController, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::new(replies));
        (controller(Mode::Single, &[], executor.clone(), LoopSettings::default()), executor)
    }

    #[tokio::test]
    async fn test_completes_on_first_iteration() {
        let (ctrl, _) = single(vec![Ok("all done <promise>DONE</promise>")]);
        let report = ctrl.run(RunConfig::new("write X", "DONE").with_max_iterations(1)).await.unwrap();

        assert_eq!(
            report.outcome,
            TerminalOutcome::Completed {
                phrase: "DONE".to_string()
            }
        );
        assert_eq!(report.iterations_used, 1);
        assert!(report.completion_detected);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let (ctrl, _) = single(vec![Ok("draft"), Ok("better draft")]);
        let report = ctrl.run(RunConfig::new("write X", "DONE").with_max_iterations(2)).await.unwrap();

        assert_eq!(report.outcome, TerminalOutcome::Exhausted { iterations: 2 });
        assert_eq!(report.final_response, "better draft");
        assert_eq!(report.state.history.len(), 2);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_wrong_phrase_is_not_completion() {
        let (ctrl, _) = single(vec![Ok("<promise>FINISHED</promise>")]);
        let report = ctrl.run(RunConfig::new("write X", "DONE").with_max_iterations(1)).await.unwrap();
        assert_eq!(report.outcome, TerminalOutcome::Exhausted { iterations: 1 });
    }

    #[tokio::test]
    async fn test_invalid_run_is_configuration_error() {
        let (ctrl, executor) = single(vec![]);
        let err = ctrl.run(RunConfig::new("  ", "DONE")).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(executor.seen().is_empty());

        let err = ctrl
            .run(RunConfig::new("write X", "DONE").with_max_iterations(0))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_restart_is_transparent() {
        let script = || -> Vec<Result<&'static str, &'static str>> {
            vec![
                Ok("one"),
                Ok("two\n<improvements>\n- be terse\n</improvements>"),
                Ok("three"),
                Ok("four"),
                Ok("five"),
            ]
        };
        let run = RunConfig::new("write X", "DONE").with_max_iterations(5).with_run_id("ralph-loop-fixed");

        let every = Arc::new(ScriptedExecutor::new(script()));
        let never = Arc::new(ScriptedExecutor::new(script()));
        let settings = LoopSettings::default().with_history_cap(2);
        let a = controller(Mode::Single, &[], every.clone(), settings.clone().with_segment_iterations(1))
            .run(run.clone())
            .await
            .unwrap();
        let b = controller(Mode::Single, &[], never.clone(), settings.with_segment_iterations(100))
            .run(run)
            .await
            .unwrap();

        assert_eq!(a.state, b.state);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.state.history.len(), 2);
        assert!(a.state.progress_summary.contains("## Iteration 1"));
        assert_eq!(a.state.lessons, vec!["be terse"]);

        let a_seen: Vec<_> = every.seen().into_iter().map(|c| (c.iteration, c.progress_summary, c.lessons)).collect();
        let b_seen: Vec<_> = never.seen().into_iter().map(|c| (c.iteration, c.progress_summary, c.lessons)).collect();
        assert_eq!(a_seen, b_seen);
    }

    #[tokio::test]
    async fn test_later_task_sees_earlier_lessons() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok("parser\n<improvements>\n- X\n</improvements>"),
            Ok("tests"),
        ]));
        let ctrl = controller(Mode::Multi, &["write parser", "write tests"], executor.clone(), LoopSettings::default());

        let step = ctrl.step(IterationState::new(), &RunConfig::new("build", "DONE")).await;

        let seen = executor.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].lessons.is_empty());
        assert_eq!(seen[1].lessons, vec!["X"]);
        assert!(seen[1].earlier_steps[0].starts_with("parser"));

        let result = step.result.unwrap();
        assert_eq!(result.produced, "parser\n<improvements>\n- X\n</improvements>\n\ntests");
        assert!(result.tasks.iter().all(|t| t.result.as_ref().unwrap().status == TaskStatus::Succeeded));
        assert_eq!(step.state.lessons, vec!["X"]);
    }

    #[tokio::test]
    async fn test_empty_plan_runs_noop() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let ctrl = controller(Mode::Multi, &[], executor.clone(), LoopSettings::default());

        let step = ctrl.step(IterationState::new(), &RunConfig::new("build", "DONE")).await;

        assert!(step.outcome.is_none());
        assert_eq!(step.state.iteration_index, 1);
        assert_eq!(step.state.history[0].output, "");
        let result = step.result.unwrap();
        assert_eq!(result.tasks[0].result.as_ref().unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_output() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok("half the work"), Err("backend down")]));
        let ctrl = controller(Mode::Multi, &["a", "b", "c"], executor.clone(), LoopSettings::default());

        let report = ctrl.run(RunConfig::new("build", "DONE")).await.unwrap();

        match &report.outcome {
            TerminalOutcome::Failed { reason } => {
                assert!(reason.contains("execute task failed"));
                assert!(reason.contains("backend down"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let entry = report.state.history.back().unwrap();
        assert!(entry.partial);
        assert_eq!(entry.output, "half the work");
        assert_eq!(executor.seen().len(), 2);
        assert_eq!(report.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_decider_failure_falls_back_to_single() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok("<promise>DONE</promise>")]));
        let ctrl = LoopController::new(
            Arc::new(FailingDecider),
            Arc::new(StaticExpander::new(["never used"])),
            executor.clone(),
            LoopSettings::default(),
        );

        let step = ctrl.step(IterationState::new(), &RunConfig::new("build", "DONE")).await;

        let result = step.result.unwrap();
        assert_eq!(result.mode, Mode::Single);
        assert!(result.rationale.starts_with("fallback"));
        assert!(step.outcome.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_iteration() {
        let (tx, rx) = watch::channel(false);
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok("one")]));
        let ctrl = controller(Mode::Single, &[], executor.clone(), LoopSettings::default()).with_cancellation(rx);
        tx.send(true).unwrap();

        let report = ctrl.run(RunConfig::new("write X", "DONE")).await.unwrap();

        assert_eq!(report.outcome, TerminalOutcome::Cancelled);
        assert_eq!(report.iterations_used, 0);
        assert!(executor.seen().is_empty());
        assert_eq!(report.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_checkpoint_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = RunConfig::new("write X", "DONE").with_max_iterations(3);
        let run_id = run.run_id.clone();

        // First process: cancelled after one iteration
        let (tx, rx) = watch::channel(false);
        let first = Arc::new(ScriptedExecutor::new(vec![Ok("one")]));
        let ctrl = controller(Mode::Single, &[], first, LoopSettings::default())
            .with_checkpoints(store.clone())
            .with_cancellation(rx);
        let state = ctrl.step(IterationState::new(), &run).await.state;
        ctrl.hand_off(&run, &state, 1).unwrap();
        tx.send(true).unwrap();
        let (cancelled, outcome) = ctrl.run_segment(&run, state).await;
        assert_eq!(outcome, Some(TerminalOutcome::Cancelled));
        ctrl.hand_off(&run, &cancelled, 2).unwrap();

        // Second process picks up from the checkpoint
        let second = Arc::new(ScriptedExecutor::new(vec![Ok("two <promise>DONE</promise>")]));
        let ctrl = controller(Mode::Single, &[], second.clone(), LoopSettings::default()).with_checkpoints(store.clone());
        let report = ctrl.resume(&run_id).await.unwrap();

        assert!(report.completion_detected);
        assert_eq!(report.iterations_used, 2);
        assert_eq!(second.seen()[0].iteration, 2);
        assert_eq!(second.seen()[0].history[0].output, "one");

        // Resuming a finished run reports without executing anything
        let third = Arc::new(ScriptedExecutor::new(vec![]));
        let ctrl = controller(Mode::Single, &[], third.clone(), LoopSettings::default()).with_checkpoints(store);
        let report = ctrl.resume(&run_id).await.unwrap();
        assert!(report.completion_detected);
        assert!(third.seen().is_empty());
    }

    #[tokio::test]
    async fn test_resume_keeps_pinned_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = RunConfig::new("build", "DONE")
            .with_max_iterations(3)
            .with_mode(Some(Mode::Multi));
        let run_id = run.run_id.clone();

        // Cancelled after one multi-step iteration
        let (tx, rx) = watch::channel(false);
        let first = Arc::new(ScriptedExecutor::new(vec![Ok("a1"), Ok("b1")]));
        let ctrl = controller(Mode::Single, &["part a", "part b"], first, LoopSettings::default())
            .with_mode_decider(Arc::new(FailingDecider))
            .with_checkpoints(store.clone())
            .with_cancellation(rx);
        let state = ctrl.step(IterationState::new(), &run).await.state;
        ctrl.hand_off(&run, &state, 1).unwrap();
        tx.send(true).unwrap();
        let (cancelled, _) = ctrl.run_segment(&run, state).await;
        ctrl.hand_off(&run, &cancelled, 2).unwrap();
        assert_eq!(store.load(&run_id).unwrap().run.mode, Some(Mode::Multi));

        // A fresh controller whose own decider would fall back to single
        let second = Arc::new(ScriptedExecutor::new(vec![Ok("a2"), Ok("b2 <promise>DONE</promise>")]));
        let ctrl = controller(Mode::Single, &["part a", "part b"], second.clone(), LoopSettings::default())
            .with_mode_decider(Arc::new(FailingDecider))
            .with_checkpoints(store);
        let report = ctrl.resume(&run_id).await.unwrap();

        assert!(report.completion_detected);
        let seen = second.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|c| c.mode == Mode::Multi));
        assert_eq!(report.final_response, "a2\n\nb2 <promise>DONE</promise>");
    }

    #[tokio::test]
    async fn test_run_refuses_existing_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let (ctrl, _) = single(vec![Ok("first <promise>DONE</promise>")]);
        let ctrl = ctrl.with_checkpoints(store.clone());
        ctrl.run(RunConfig::new("first prompt", "DONE").with_run_id("ralph-loop-dup00001"))
            .await
            .unwrap();

        let (ctrl, executor) = single(vec![Ok("second")]);
        let err = ctrl
            .with_checkpoints(store.clone())
            .run(RunConfig::new("second prompt", "DONE").with_run_id("ralph-loop-dup00001"))
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::RunExists(ref id) if id == "ralph-loop-dup00001"));
        assert!(executor.seen().is_empty());
        let checkpoint = store.load("ralph-loop-dup00001").unwrap();
        assert_eq!(checkpoint.run.prompt, "first prompt");
        assert_eq!(checkpoint.state.terminal, crate::state::Terminal::Completed);
    }

    #[tokio::test]
    async fn test_terminal_state_respects_history_cap() {
        let settings = LoopSettings::default().with_history_cap(1);

        let executor = Arc::new(ScriptedExecutor::new(vec![Ok("one"), Ok("two <promise>DONE</promise>")]));
        let report = controller(Mode::Single, &[], executor, settings.clone())
            .run(RunConfig::new("write X", "DONE"))
            .await
            .unwrap();
        assert!(report.completion_detected);
        assert_eq!(report.state.history.len(), 1);
        assert_eq!(report.final_response, "two <promise>DONE</promise>");
        assert!(report.state.progress_summary.contains("one"));

        let executor = Arc::new(ScriptedExecutor::new(vec![Ok("one"), Ok("two"), Ok("half"), Err("backend down")]));
        let report = controller(Mode::Multi, &["a", "b"], executor, settings)
            .run(RunConfig::new("write X", "DONE"))
            .await
            .unwrap();
        assert!(matches!(report.outcome, TerminalOutcome::Failed { .. }));
        assert_eq!(report.state.history.len(), 1);
        assert!(report.state.history[0].partial);
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, _) = single(vec![]);
        let ctrl = ctrl.with_checkpoints(CheckpointStore::new(dir.path()));
        assert!(matches!(ctrl.resume("ralph-loop-missing").await, Err(LoopError::UnknownRun(_))));
    }
}
