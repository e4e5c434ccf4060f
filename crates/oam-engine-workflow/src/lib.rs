//! The persistent workflow context store and the step-execution engine: the
//! Workflow Context Store, Workflow Engine, and Input/Output Hooks subsystems
//! of the application rendering and workflow execution core.

pub mod backoff;
pub mod context;
pub mod engine;
pub mod hooks;
pub mod runner;
pub mod testing;

pub mod prelude {
    pub use crate::context::{ContextKey, PersistedContext, WorkflowContext, WorkflowContextBackend};
    pub use crate::engine::{WorkflowEngine, WorkflowState};
    pub use crate::hooks::{mirror_status_by_name, resolve_inputs, resolve_outputs};
    pub use crate::runner::{Operation, RunOptions, RunResult, StepOutcome, TaskRunner};
}
