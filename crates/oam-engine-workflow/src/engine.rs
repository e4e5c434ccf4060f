//! Workflow Engine (spec §4.10): drives one reconciliation tick of sequential
//! or DAG-mode step execution over a set of [`TaskRunner`]s.

use std::collections::HashMap;

use chrono::Utc;
use oam_engine_core::config::EngineConfig;
use oam_engine_core::error::CoreError;
use oam_engine_core::models::{StepPhase, StepStatus, WorkflowMode, WorkflowStatus, WorkflowStepSpec};
use serde_json::Value;
use tracing::instrument;

use crate::backoff::backoff_interval_secs;
use crate::context::{WorkflowContext, WorkflowContextBackend};
use crate::hooks::{mirror_status_by_name, resolve_inputs, resolve_outputs};
use crate::runner::{Operation, RunOptions, RunResult, TaskRunner};

/// Memory prefix under which per-step backoff attempt counters live
/// (spec §4.9, §4.10).
pub const BACKOFF_MEMORY_PREFIX: &str = "backoff-attempts";

/// The phase of one reconciliation tick, returned to the caller driving the
/// outer reconcile loop (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// First tick for a new revision: status was just reset.
    Initializing,
    /// At least one step ran this tick and the workflow is not yet done.
    Executing,
    /// A step requested an indefinite suspend.
    Suspended,
    /// A step requested a timed suspend.
    SuspendedWaiting,
    /// A step requested termination, or the application revision changed mid-run.
    Terminated,
    /// Every step just reached `Succeeded` for the first time this run.
    Succeeded,
    /// Settled: every step succeeded and this was already observed.
    Finished,
    /// No steps to run (zero-length workflow).
    Skipping,
}

/// Drives step execution for one application's workflow.
pub struct WorkflowEngine {
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs exactly one reconciliation tick (spec §4.10). `runners[i]` must
    /// correspond to `steps[i]`.
    #[instrument(skip(self, runners, steps, status, ctx, backend, status_by_name))]
    pub async fn tick(
        &self,
        runners: &[Box<dyn TaskRunner>],
        steps: &[WorkflowStepSpec],
        mode: WorkflowMode,
        revision_hash: &str,
        status: &mut WorkflowStatus,
        ctx: &mut WorkflowContext,
        backend: &dyn WorkflowContextBackend,
        status_by_name: &mut HashMap<String, StepStatus>,
    ) -> Result<WorkflowState, CoreError> {
        if status.app_revision != revision_hash {
            if status.app_revision.is_empty() || status.finished {
                *status = WorkflowStatus::new(revision_hash, mode);
                ctx.clear_prefix(BACKOFF_MEMORY_PREFIX);
            } else {
                status.terminated = true;
                status.message = "workflow terminated: application revision changed mid-run".into();
                status.app_revision = revision_hash.to_string();
                ctx.commit(backend).await?;
                return Ok(WorkflowState::Terminated);
            }
        }

        if status.terminated {
            return Ok(WorkflowState::Terminated);
        }

        if runners.is_empty() {
            status.finished = true;
            ctx.commit(backend).await?;
            return Ok(WorkflowState::Skipping);
        }

        if status.suspend {
            if status.suspend_state == "StepSuspendWaiting" {
                // A timed suspend has nothing left to wait on but the clock; clear
                // the flag and let the tick fall through so the outstanding step
                // gets re-run and its deadline re-checked, instead of freezing the
                // workflow in `Running` forever.
                status.suspend = false;
                status.suspend_state.clear();
            } else {
                return Ok(suspended_state(status));
            }
        }

        match mode {
            WorkflowMode::Sequential => self.run_sequential(runners, steps, status, ctx, backend, status_by_name).await?,
            WorkflowMode::Dag => self.run_dag(runners, steps, status, ctx, backend, status_by_name).await?,
        }

        if status.terminated {
            return Ok(WorkflowState::Terminated);
        }
        if status.suspend {
            return Ok(suspended_state(status));
        }

        let all_succeeded =
            runners.len() == status.steps.len() && status.steps.iter().all(|s| s.phase == StepPhase::Succeeded);

        if all_succeeded {
            if status.finished {
                return Ok(WorkflowState::Finished);
            }
            status.finished = true;
            ctx.commit(backend).await?;
            return Ok(WorkflowState::Succeeded);
        }

        Ok(WorkflowState::Executing)
    }

    /// Computes how long the caller should wait before the next tick, given
    /// the attempt counters recorded for every step still outstanding
    /// (spec §4.10).
    pub fn next_backoff_secs(&self, ctx: &WorkflowContext, status: &WorkflowStatus) -> f64 {
        let any_step_failed = status.steps.iter().any(|s| s.phase == StepPhase::Failed);
        let min_count = status
            .steps
            .iter()
            .filter(|s| s.phase != StepPhase::Succeeded)
            .filter_map(|s| ctx.get_value_in_memory(BACKOFF_MEMORY_PREFIX, &s.id))
            .filter_map(|v| v.as_u64())
            .map(|v| v as u32)
            .min()
            .unwrap_or(self.config.backoff.initial_min_seen_attempt_count);
        backoff_interval_secs(min_count, any_step_failed, &self.config.backoff)
    }

    async fn run_sequential(
        &self,
        runners: &[Box<dyn TaskRunner>],
        steps: &[WorkflowStepSpec],
        status: &mut WorkflowStatus,
        ctx: &mut WorkflowContext,
        backend: &dyn WorkflowContextBackend,
        status_by_name: &mut HashMap<String, StepStatus>,
    ) -> Result<(), CoreError> {
        let start = status.steps.iter().position(|s| s.phase != StepPhase::Succeeded).unwrap_or(status.steps.len());
        for idx in start..runners.len() {
            self.run_one_step(runners[idx].as_ref(), &steps[idx], status, ctx, backend, status_by_name)
                .await?;
            let just_ran = status.steps.iter().find(|s| s.name == runners[idx].name()).expect("just recorded");
            let keep_going = just_ran.phase == StepPhase::Succeeded && !status.suspend && !status.terminated;
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    async fn run_dag(
        &self,
        runners: &[Box<dyn TaskRunner>],
        steps: &[WorkflowStepSpec],
        status: &mut WorkflowStatus,
        ctx: &mut WorkflowContext,
        backend: &dyn WorkflowContextBackend,
        status_by_name: &mut HashMap<String, StepStatus>,
    ) -> Result<(), CoreError> {
        loop {
            let mut progressed = false;
            for (idx, runner) in runners.iter().enumerate() {
                if status.suspend || status.terminated {
                    break;
                }
                let done = status.steps.iter().any(|s| s.name == runner.name() && s.phase == StepPhase::Succeeded);
                if done {
                    continue;
                }
                if runner.pending(ctx).await {
                    continue;
                }
                self.run_one_step(runner.as_ref(), &steps[idx], status, ctx, backend, status_by_name).await?;
                progressed = true;
            }
            if status.suspend || status.terminated {
                break;
            }
            let all_done = runners
                .iter()
                .all(|r| status.steps.iter().any(|s| s.name == r.name() && s.phase == StepPhase::Succeeded));
            if all_done || !progressed {
                break;
            }
        }
        Ok(())
    }

    async fn run_one_step(
        &self,
        runner: &dyn TaskRunner,
        spec: &WorkflowStepSpec,
        status: &mut WorkflowStatus,
        ctx: &mut WorkflowContext,
        backend: &dyn WorkflowContextBackend,
        status_by_name: &mut HashMap<String, StepStatus>,
    ) -> Result<(), CoreError> {
        let existing_idx = status.steps.iter().position(|s| s.name == runner.name());
        let now = Utc::now();
        let mut step_status = match existing_idx {
            Some(idx) => status.steps[idx].clone(),
            None => StepStatus::new(format!("{}-{}", status.app_revision, runner.name()), runner.name().to_string(), spec.step_type.clone()),
        };

        let options = RunOptions { max_retries: self.config.runner.max_retries, input_overrides: resolve_inputs(ctx, spec) };

        let run_result = match runner.run(ctx, &options).await {
            Ok(result) => result,
            Err(err) => RunResult { phase: StepPhase::Failed, reason: err.to_string(), operation: Operation::default(), produced: Value::Null },
        };

        step_status.phase = run_result.phase;
        step_status.reason = run_result.reason.clone();
        step_status.last_execute_time = now;

        match existing_idx {
            Some(idx) => status.steps[idx] = step_status.clone(),
            None => status.steps.push(step_status.clone()),
        }

        if let Err(err) = resolve_outputs(ctx, spec, &run_result.produced, step_status.phase) {
            tracing::warn!(step = %spec.name, error = %err, "unresolved workflow step output");
        }
        mirror_status_by_name(status_by_name, spec, &step_status);

        let waiting_on_suspend = step_status.phase == StepPhase::Running && spec.step_type == "suspend";
        if step_status.phase == StepPhase::Succeeded || step_status.phase == StepPhase::Skipped || waiting_on_suspend {
            ctx.delete_value_in_memory(BACKOFF_MEMORY_PREFIX, &step_status.id);
        } else {
            ctx.increase_count_value_in_memory(BACKOFF_MEMORY_PREFIX, &step_status.id);
        }

        if run_result.operation.suspend {
            status.suspend = true;
            status.suspend_state = if run_result.operation.waiting { "StepSuspendWaiting".to_string() } else { "StepSuspend".to_string() };
        }
        if run_result.operation.terminated {
            status.terminated = true;
            status.message = format!("workflow terminated by step \"{}\"", spec.name);
        }
        if run_result.operation.failed_after_retries {
            status.suspend = true;
            status.suspend_state = "StepSuspend".to_string();
            status.message =
                "The workflow suspends automatically because the failed times of steps have reached the limit".to_string();
        }

        ctx.commit(backend).await
    }
}

fn suspended_state(status: &WorkflowStatus) -> WorkflowState {
    if status.suspend_state == "StepSuspendWaiting" {
        WorkflowState::SuspendedWaiting
    } else {
        WorkflowState::Suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryWorkflowContextBackend;
    use async_trait::async_trait;

    struct AlwaysSucceeds(&'static str);

    #[async_trait]
    impl TaskRunner for AlwaysSucceeds {
        fn name(&self) -> &str {
            self.0
        }
        async fn pending(&self, _ctx: &WorkflowContext) -> bool {
            false
        }
        async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
            Ok(RunResult::succeeded())
        }
    }

    struct AlwaysFails(&'static str);

    #[async_trait]
    impl TaskRunner for AlwaysFails {
        fn name(&self) -> &str {
            self.0
        }
        async fn pending(&self, _ctx: &WorkflowContext) -> bool {
            false
        }
        async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
            Ok(RunResult {
                phase: StepPhase::Failed,
                reason: "boom".into(),
                operation: Operation::default(),
                produced: Value::Null,
            })
        }
    }

    fn step(name: &str) -> WorkflowStepSpec {
        WorkflowStepSpec { name: name.into(), step_type: "success".into(), properties: Value::Null, depends_on: vec![], inputs: vec![], outputs: vec![], timeout: None }
    }

    #[tokio::test]
    async fn three_successful_steps_finish_after_two_ticks() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let backend = InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let mut status = WorkflowStatus::new("", WorkflowMode::Sequential);
        let mut by_name = HashMap::new();
        let runners: Vec<Box<dyn TaskRunner>> =
            vec![Box::new(AlwaysSucceeds("s1")), Box::new(AlwaysSucceeds("s2")), Box::new(AlwaysSucceeds("s3"))];
        let steps = vec![step("s1"), step("s2"), step("s3")];

        let first = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(first, WorkflowState::Succeeded);
        assert!(status.steps.iter().all(|s| s.phase == StepPhase::Succeeded));

        let second = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(second, WorkflowState::Finished);
    }

    #[tokio::test]
    async fn sequential_mode_stops_at_the_first_failure() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let backend = InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let mut status = WorkflowStatus::new("", WorkflowMode::Sequential);
        let mut by_name = HashMap::new();
        let runners: Vec<Box<dyn TaskRunner>> =
            vec![Box::new(AlwaysSucceeds("s1")), Box::new(AlwaysFails("s2")), Box::new(AlwaysSucceeds("s3"))];
        let steps = vec![step("s1"), step("s2"), step("s3")];

        let state = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(state, WorkflowState::Executing);
        assert_eq!(status.steps[0].phase, StepPhase::Succeeded);
        assert_eq!(status.steps[1].phase, StepPhase::Failed);
        assert_eq!(status.steps.len(), 2, "step 3 must not have run");
    }

    #[tokio::test]
    async fn revision_change_mid_run_terminates() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let backend = InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let mut status = WorkflowStatus::new("", WorkflowMode::Sequential);
        let mut by_name = HashMap::new();
        let runners: Vec<Box<dyn TaskRunner>> = vec![Box::new(AlwaysFails("s1"))];
        let steps = vec![step("s1")];

        engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        let state = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-2", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(state, WorkflowState::Terminated);
    }

    #[tokio::test]
    async fn zero_steps_finishes_immediately() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let backend = InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let mut status = WorkflowStatus::new("", WorkflowMode::Sequential);
        let mut by_name = HashMap::new();
        let runners: Vec<Box<dyn TaskRunner>> = vec![];
        let steps = vec![];

        let state = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(state, WorkflowState::Skipping);
        assert!(status.finished);
    }

    /// A step that stays `Running` + `waiting` on its first call (an elapsed
    /// check that hasn't reached its deadline yet) and succeeds on the next.
    struct TimedSuspend {
        name: &'static str,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl TaskRunner for TimedSuspend {
        fn name(&self) -> &str {
            self.name
        }
        async fn pending(&self, _ctx: &WorkflowContext) -> bool {
            false
        }
        async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
            use std::sync::atomic::Ordering;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(RunResult {
                    phase: StepPhase::Running,
                    reason: "waiting 5s more".into(),
                    operation: Operation { suspend: true, waiting: true, ..Default::default() },
                    produced: Value::Null,
                })
            } else {
                Ok(RunResult::succeeded())
            }
        }
    }

    #[tokio::test]
    async fn timed_suspend_is_re_checked_on_the_next_tick_instead_of_freezing() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let backend = InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let mut status = WorkflowStatus::new("", WorkflowMode::Sequential);
        let mut by_name = HashMap::new();
        let runners: Vec<Box<dyn TaskRunner>> =
            vec![Box::new(TimedSuspend { name: "wait-a-bit", calls: std::sync::atomic::AtomicU32::new(0) })];
        let mut suspend_step = step("wait-a-bit");
        suspend_step.step_type = "suspend".into();
        let steps = vec![suspend_step];

        let first = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(first, WorkflowState::SuspendedWaiting);
        assert_eq!(status.steps[0].phase, StepPhase::Running);

        let second = engine.tick(&runners, &steps, WorkflowMode::Sequential, "rev-1", &mut status, &mut ctx, &backend, &mut by_name).await.unwrap();
        assert_eq!(second, WorkflowState::Succeeded);
        assert_eq!(status.steps[0].phase, StepPhase::Succeeded);
        assert!(!status.suspend);
    }
}
