//! The `TaskRunner` boundary (spec §4.10): each workflow step type (the
//! `apply-component`/`suspend`/`notification`/... builtins, or a user-defined
//! step) is driven through this trait. The engine never inspects a step's
//! internals beyond what `TaskRunner` exposes.

use async_trait::async_trait;
use oam_engine_core::error::CoreError;
use oam_engine_core::models::StepStatus;
use serde_json::Value;
use std::collections::HashMap;

use crate::context::WorkflowContext;

/// Per-tick knobs the engine passes into [`TaskRunner::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_retries: u32,
    /// Values resolved from workflow-context variables via `step.inputs`
    /// (spec §4.11), keyed by `parameterKey`. Implementations merge these
    /// into their own properties tree before acting.
    pub input_overrides: HashMap<String, Value>,
}

/// Signals a runner raises back to the engine beyond its `StepStatus` phase
/// (spec §4.10).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operation {
    /// Suspend the whole workflow (the `suspend` step type always sets this
    /// while `Running`).
    pub suspend: bool,
    /// Terminate the whole workflow immediately.
    pub terminated: bool,
    /// Suspend until a duration elapses rather than indefinitely.
    pub waiting: bool,
    /// This step has exhausted its retry budget (spec §4.10 failure policy).
    pub failed_after_retries: bool,
}

/// The output of one [`TaskRunner::run`] invocation.
pub struct RunResult {
    pub phase: oam_engine_core::models::StepPhase,
    pub reason: String,
    pub operation: Operation,
    /// Arbitrary data the step produced, consulted by `step.outputs[].valueFrom`
    /// (spec §4.11).
    pub produced: Value,
}

impl RunResult {
    pub fn succeeded() -> Self {
        Self {
            phase: oam_engine_core::models::StepPhase::Succeeded,
            reason: String::new(),
            operation: Operation::default(),
            produced: Value::Null,
        }
    }

    pub fn with_produced(mut self, produced: Value) -> Self {
        self.produced = produced;
        self
    }
}

/// One executable workflow step type (spec §4.10).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this step is still waiting on an unmet dependency (DAG mode
    /// consults this before scheduling a step; spec §4.10).
    async fn pending(&self, ctx: &WorkflowContext) -> bool;

    /// Executes one attempt. Errors are captured per-step and never abort the
    /// engine (spec §4.10) — callers wrap failures as `StepPhase::Failed`
    /// rather than propagating `CoreError` upward.
    async fn run(&self, ctx: &mut WorkflowContext, options: &RunOptions) -> Result<RunResult, CoreError>;
}

/// Snapshot of `StepStatus` alongside the `Operation` flags produced this
/// tick, threaded through the hooks and the status-by-name mirror (spec §4.11).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub operation: Operation,
    pub produced: Value,
}
