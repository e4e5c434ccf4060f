//! [`ProcessContext`]: the mutable carrier threaded through one component's template
//! evaluations (spec §2.3). Not to be confused with the persistent, cross-tick
//! `WorkflowContext` owned by `oam-engine-workflow` — this one lives for the
//! duration of a single render pass and is dropped afterward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// App/component identity injected into every template evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMeta {
    pub app_name: String,
    pub namespace: String,
    pub revision: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub workflow_name: Option<String>,
    pub publish_version: Option<String>,
    pub component_type: String,
}

/// Mutable record carried through template evaluation for one component (spec §2.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessContext {
    pub app: AppMeta,
    pub parameters: Value,
    /// The accumulating "base" value: the enclosing component's main `output:`.
    base: Value,
    /// Auxiliary outputs in evaluation order, each keyed by a unique name.
    auxiliaries: Vec<(String, Value)>,
}

impl ProcessContext {
    pub fn new(app: AppMeta, parameters: Value) -> Self {
        Self {
            app,
            parameters,
            base: Value::Null,
            auxiliaries: Vec::new(),
        }
    }

    /// Sets the base `output:` value, replacing any previous base.
    pub fn set_base(&mut self, value: Value) {
        self.base = value;
    }

    /// Appends or replaces a named auxiliary output (an `outputs:` sub-field).
    pub fn push_auxiliary(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.auxiliaries.iter_mut().find(|(n, _)| n == &name) {
            entry.1 = value;
        } else {
            self.auxiliaries.push((name, value));
        }
    }

    /// `Set` — updates an already-pushed auxiliary in place, or the base if `name`
    /// is `None`.
    pub fn set(&mut self, name: Option<&str>, value: Value) {
        match name {
            None => self.set_base(value),
            Some(name) => self.push_auxiliary(name, value),
        }
    }

    /// Returns `(base, auxiliaries)` for assembly into a [`crate::models::ComponentManifest`].
    pub fn output(&self) -> (Value, Vec<(String, Value)>) {
        (self.base.clone(), self.auxiliaries.clone())
    }

    /// Renders the synthetic `{base context}` document the parameter validator
    /// compiles alongside the template and parameter block (spec §4.4 step 1).
    ///
    /// Includes the accumulated `output`/`outputs` so far, so that a trait
    /// evaluated after the workload can refer to `context.output` (spec §4.3 tie-
    /// break rules).
    pub fn base_context_file(&self) -> Value {
        let mut outputs = serde_json::Map::new();
        for (name, value) in &self.auxiliaries {
            outputs.insert(name.clone(), value.clone());
        }
        serde_json::json!({
            "context": {
                "name": self.app.app_name,
                "namespace": self.app.namespace,
                "revision": self.app.revision,
                "componentType": self.app.component_type,
                "output": self.base,
                "outputs": outputs,
            }
        })
    }
}
