//! In-memory fixtures: a [`WorkflowContextBackend`] and a handful of canned
//! [`TaskRunner`]s covering the literal scenarios exercised throughout this
//! crate's tests. Not `#[cfg(test)]`-gated so `oam-engine-app` can reuse them
//! in its own dev-dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use oam_engine_core::error::CoreError;
use serde_json::Value;

use crate::context::{ContextKey, PersistedContext, WorkflowContext, WorkflowContextBackend};
use crate::runner::{Operation, RunOptions, RunResult, TaskRunner};

/// A process-local workflow context store (spec §4.9, §5: the
/// `in_memory_context_store` configuration path).
#[derive(Default)]
pub struct InMemoryWorkflowContextBackend {
    records: Mutex<HashMap<String, PersistedContext>>,
}

fn cache_key(key: &ContextKey) -> String {
    format!("{}/{}", key.namespace, key.app_name)
}

#[async_trait]
impl WorkflowContextBackend for InMemoryWorkflowContextBackend {
    async fn load(&self, key: &ContextKey) -> Result<Option<PersistedContext>, CoreError> {
        Ok(self.records.lock().unwrap().get(&cache_key(key)).cloned())
    }

    async fn save(&self, key: &ContextKey, record: PersistedContext) -> Result<(), CoreError> {
        self.records.lock().unwrap().insert(cache_key(key), record);
        Ok(())
    }

    async fn clear(&self, key: &ContextKey) -> Result<(), CoreError> {
        self.records.lock().unwrap().remove(&cache_key(key));
        Ok(())
    }
}

/// Always succeeds on the first attempt.
pub struct SucceedingRunner(pub String);

#[async_trait]
impl TaskRunner for SucceedingRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult::succeeded())
    }
}

/// Always fails, never sets `failed_after_retries` itself — the engine tracks
/// the retry budget via its own attempt counter.
pub struct FailingRunner(pub String);

#[async_trait]
impl TaskRunner for FailingRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult {
            phase: oam_engine_core::models::StepPhase::Failed,
            reason: "synthetic failure".into(),
            operation: Operation::default(),
            produced: Value::Null,
        })
    }
}

/// Reports `Running` and requests an indefinite suspend (the `suspend` step type).
pub struct SuspendingRunner(pub String);

#[async_trait]
impl TaskRunner for SuspendingRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult {
            phase: oam_engine_core::models::StepPhase::Running,
            reason: "waiting for manual resume".into(),
            operation: Operation { suspend: true, ..Default::default() },
            produced: Value::Null,
        })
    }
}

/// Requests immediate termination of the whole workflow.
pub struct TerminatingRunner(pub String);

#[async_trait]
impl TaskRunner for TerminatingRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult {
            phase: oam_engine_core::models::StepPhase::Failed,
            reason: "fatal condition".into(),
            operation: Operation { terminated: true, ..Default::default() },
            produced: Value::Null,
        })
    }
}

/// Stays pending until a named variable is set in the workflow context
/// (used to exercise DAG-mode scheduling).
pub struct PendingUntilVarRunner {
    pub name: String,
    pub wait_on_var: String,
}

#[async_trait]
impl TaskRunner for PendingUntilVarRunner {
    fn name(&self) -> &str {
        &self.name
    }
    async fn pending(&self, ctx: &WorkflowContext) -> bool {
        ctx.get_var(&[self.wait_on_var.as_str()]).is_none()
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult::succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backend_round_trips_a_saved_record() {
        let backend = InMemoryWorkflowContextBackend::default();
        let key = ContextKey::new("default", "web");
        backend.save(&key, PersistedContext::default()).await.unwrap();
        assert!(backend.load(&key).await.unwrap().is_some());
        backend.clear(&key).await.unwrap();
        assert!(backend.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_until_var_runner_blocks_until_variable_set() {
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let runner = PendingUntilVarRunner { name: "apply-b".into(), wait_on_var: "a-ready".into() };
        assert!(runner.pending(&ctx).await);
        ctx.set_var(Value::from(true), &["a-ready"]);
        assert!(!runner.pending(&ctx).await);
    }
}
