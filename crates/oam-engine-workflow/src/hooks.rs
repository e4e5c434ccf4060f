//! Input/Output Hooks (spec §4.11): wiring between workflow-context variables
//! and a step's own parameter tree, evaluated immediately before and after
//! `TaskRunner::run`.

use std::collections::HashMap;

use oam_engine_core::error::CoreError;
use oam_engine_core::models::{StepPhase, StepStatus, WorkflowStepSpec};
use serde_json::Value;

use crate::context::WorkflowContext;

/// Resolves `step.inputs[]` against workflow-context variables, producing the
/// `parameterKey -> value` overrides the engine merges into [`crate::runner::RunOptions`]
/// before invoking the runner. An input whose source path is unset is skipped
/// rather than treated as an error — a step may run before its declared
/// dependency has published the variable on an earlier, still-settling tick.
pub fn resolve_inputs(ctx: &WorkflowContext, step: &WorkflowStepSpec) -> HashMap<String, Value> {
    let mut overrides = HashMap::new();
    for input in &step.inputs {
        let path: Vec<&str> = input.from.split('.').collect();
        if let (Some(value), Some(key)) = (ctx.get_var(&path), &input.parameter_key) {
            overrides.insert(key.clone(), value);
        }
    }
    overrides
}

/// Applies `step.outputs[]` after a run: each `valueFrom` is a dotted path
/// looked up in the value the step produced, and the result is written into
/// the workflow-context variable named by `output.name`. A `Skipped` step
/// writes `null` for every output rather than erroring; any other phase that
/// leaves an output unresolved accumulates an error, since a declared output
/// with no value breaks every step downstream that depends on it.
pub fn resolve_outputs(
    ctx: &mut WorkflowContext,
    step: &WorkflowStepSpec,
    produced: &Value,
    phase: StepPhase,
) -> Result<(), CoreError> {
    let mut errors = Vec::new();
    for output in &step.outputs {
        let path: Vec<&str> = output.value_from.split('.').collect();
        match (lookup_path(produced, &path), phase) {
            (Some(value), _) => ctx.set_var(value, &[output.name.as_str()]),
            (None, StepPhase::Skipped) => ctx.set_var(Value::Null, &[output.name.as_str()]),
            (None, _) => errors.push(format!(
                "step \"{}\": output \"{}\": valueFrom \"{}\" not found",
                step.name, output.name, output.value_from
            )),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::validation(step.name.clone(), errors.join("; ")))
    }
}

/// Mirrors a succeeded step's status under an additional key so dependent
/// `apply-component` steps can resolve readiness by component name rather
/// than by step name (spec §9 Open Question: mirrored only on
/// `StepPhase::Succeeded`, never on `Running`/`Failed`, so a reader can treat
/// presence in this map as "ready").
pub fn mirror_status_by_name(status_by_name: &mut HashMap<String, StepStatus>, step: &WorkflowStepSpec, status: &StepStatus) {
    if status.phase != StepPhase::Succeeded {
        return;
    }
    let extra_key = step
        .properties
        .get("name")
        .or_else(|| step.properties.get("component"))
        .and_then(Value::as_str);
    if let Some(key) = extra_key {
        status_by_name.insert(key.to_string(), status.clone());
    }
}

fn lookup_path(root: &Value, path: &[&str]) -> Option<Value> {
    let mut cursor = root;
    for segment in path {
        cursor = cursor.get(segment)?;
    }
    Some(cursor.clone())
}
