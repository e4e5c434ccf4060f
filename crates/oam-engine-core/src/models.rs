//! Core data model (spec §3): the resolved capability (`Template`), the parsed
//! application (`ParsedAppfile`), its constituent `Component`/`Trait`/`Scope`
//! records, and the render result (`ComponentManifest`).
//!
//! Dynamic, user-authored data (component properties, trait properties, rendered
//! workload objects) is represented as `serde_json::Value` rather than a bespoke
//! tagged-variant type: `serde_json::Value` already is the {Null, Bool, Number,
//! String, Array, Object} tree the design notes call for, and reusing it avoids a
//! parallel conversion layer every renderer would otherwise need.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the four schematic categories a `Template` may carry (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateCategory {
    TemplateLanguage,
    EmbeddedChart,
    RawManifest,
    InfraAsCode,
}

/// The kind of capability a `Template` was resolved for (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    Component,
    Trait,
    Policy,
    WorkflowStep,
    Scope,
    /// Legacy fallback used by `Load` when a component's kind is unknown.
    Workload,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilityKind::Component => "component",
            CapabilityKind::Trait => "trait",
            CapabilityKind::Policy => "policy",
            CapabilityKind::WorkflowStep => "workflow-step",
            CapabilityKind::Scope => "scope",
            CapabilityKind::Workload => "workload",
        };
        f.write_str(s)
    }
}

/// A typed resource reference: api-group/version + kind, the shape a `Template`
/// declares for its primary workload output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadGvk {
    pub api_version: String,
    pub kind: String,
}

/// Sub-kind of `infra-as-code` templates (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfraTemplateType {
    Hcl,
    Remote,
}

/// A fully resolved capability definition, immutable once built (spec §3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub category: TemplateCategory,
    /// Set when `category == TemplateLanguage` (or a raw-manifest/IaC component is
    /// being rendered via the template-language path, per §4.5).
    pub template_str: Option<String>,
    pub health_policy: Option<String>,
    pub custom_status: Option<String>,
    pub workload: Option<WorkloadGvk>,
    /// `category == InfraAsCode` only: hcl vs. remote module source.
    pub infra_type: Option<InfraTemplateType>,
    /// `category == EmbeddedChart` only: the chart pointer (spec §4.1, §4.5).
    pub helm: Option<crate::registry::HelmSpec>,
    /// `category == InfraAsCode` only: the module reference (spec §4.1, §4.5).
    pub infra: Option<crate::registry::InfraSpec>,
    /// `category == RawManifest` only: the decoded raw object to overlay (spec §4.5).
    pub raw_manifest: Option<Value>,
    /// `category == RawManifest` only: declared parameter types and injection
    /// field-paths (spec §4.6).
    pub raw_parameter_schema: HashMap<String, crate::registry::RawParameterSpec>,
    /// Name of the originating ComponentDefinition/TraitDefinition/... record.
    pub definition_name: String,
    pub capability_kind: CapabilityKind,
}

impl Template {
    pub fn new(definition_name: impl Into<String>, capability_kind: CapabilityKind) -> Self {
        Self {
            category: TemplateCategory::TemplateLanguage,
            template_str: None,
            health_policy: None,
            custom_status: None,
            workload: None,
            infra_type: None,
            helm: None,
            infra: None,
            raw_manifest: None,
            raw_parameter_schema: HashMap::new(),
            definition_name: definition_name.into(),
            capability_kind,
        }
    }
}

/// One trait attached to a [`Component`] (spec §3, §4.3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trait {
    pub name: String,
    pub category: TemplateCategory,
    pub user_params: HashMap<String, Value>,
    pub template_str: String,
    pub health_policy: Option<String>,
    pub custom_status: Option<String>,
    /// Dotted path on the trait output where the assembler writes the workload
    /// back-reference. Empty string means "no back-reference".
    pub workload_ref_path: String,
}

/// One parsed component (spec §3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Capability name; equal to the component's `type` field in the Application doc.
    pub component_type: String,
    pub category: TemplateCategory,
    pub user_params: HashMap<String, Value>,
    pub template: Template,
    pub traits: Vec<Trait>,
    pub scopes: Vec<String>,
    /// Override-policy patch tree, applied after all traits are evaluated (§4.3).
    pub patch: Option<Value>,
}

impl Component {
    /// Required-parameter input sources other than direct user params — workflow
    /// step inputs and override-policy properties — flattened to dotted keys
    /// (spec §4.4 steps 4–5). Populated by the parser/validator, not stored on the
    /// component itself, hence kept as a free function rather than a field.
    pub fn flattened_user_params(&self) -> Vec<String> {
        flatten_keys(&Value::Object(
            self.user_params.clone().into_iter().collect(),
        ))
    }
}

/// Flattens a JSON object into dotted leaf-path keys, e.g. `{"a":{"b":1}}` → `["a.b"]`.
pub fn flatten_keys(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    flatten_keys_into(value, String::new(), &mut out);
    out
}

fn flatten_keys_into(value: &Value, prefix: String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let next = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_keys_into(v, next, out);
            }
        }
        _ => {
            if !prefix.is_empty() {
                out.push(prefix);
            }
        }
    }
}

/// A single parsed workflow step (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepSpec {
    pub name: String,
    pub step_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub from: String,
    pub parameter_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub name: String,
    pub value_from: String,
}

/// Execution mode for the workflow as a whole (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    Sequential,
    Dag,
}

/// A parsed policy (spec §4.2). Internal policy types never render; `custom` ones do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub policy_type: String,
    pub properties: Value,
}

/// Internal policy types that side-effect the appfile without emitting a workflow
/// artifact (spec §4.2).
pub const INTERNAL_POLICY_TYPES: &[&str] =
    &["garbage-collect", "override", "topology", "apply-once", "debug"];

pub fn is_internal_policy_type(policy_type: &str) -> bool {
    INTERNAL_POLICY_TYPES.contains(&policy_type)
}

/// Root record for one Application reconciliation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAppfile {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub revision_name: String,
    pub revision_hash: String,
    pub components: Vec<Component>,
    pub policies: Vec<PolicySpec>,
    pub workflow_steps: Vec<WorkflowStepSpec>,
    pub workflow_mode: Option<WorkflowMode>,
    /// Related definitions keyed by capability kind, then by name. Populated for
    /// component/trait/policy/workflow-step capabilities referenced anywhere in
    /// the document, including ones pulled in indirectly by `override` policies.
    pub related_definitions: HashMap<CapabilityKind, HashMap<String, Template>>,
    /// Debug flag toggled by a `debug`-typed policy.
    pub debug: bool,
}

impl ParsedAppfile {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            revision_name: String::new(),
            revision_hash: String::new(),
            components: Vec::new(),
            policies: Vec::new(),
            workflow_steps: Vec::new(),
            workflow_mode: None,
            related_definitions: HashMap::new(),
            debug: false,
        }
    }
}

/// One rendered component's output set (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub name: String,
    pub namespace: String,
    pub revision_name: String,
    /// The "workload": the component's primary rendered output.
    pub primary: Value,
    /// The "traits": ordered secondary outputs, one or more per trait.
    pub auxiliaries: Vec<AuxiliaryOutput>,
    /// Embedded-chart components only: release + repository objects.
    pub packaged_workload_resources: Option<PackagedWorkloadResources>,
}

/// One auxiliary (trait) output, labeled per spec §4.5/§4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryOutput {
    pub name: Option<String>,
    pub trait_type: String,
    pub resource_name: Option<String>,
    pub object: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagedWorkloadResources {
    pub release: Value,
    pub repository: Value,
}

/// Top-level workflow state embedded in the Application's status (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub app_revision: String,
    pub mode: WorkflowMode,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub finished: bool,
    pub suspend: bool,
    pub terminated: bool,
    pub suspend_state: String,
    pub message: String,
    pub steps: Vec<StepStatus>,
}

impl WorkflowStatus {
    pub fn new(app_revision: impl Into<String>, mode: WorkflowMode) -> Self {
        Self {
            app_revision: app_revision.into(),
            mode,
            start_time: chrono::Utc::now(),
            finished: false,
            suspend: false,
            terminated: false,
            suspend_state: String::new(),
            message: String::new(),
            steps: Vec::new(),
        }
    }
}

/// Phase of a single workflow step (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed,
    Stopped,
}

/// Per-step status, stable across reconciliations for a given workflow revision
/// (spec §3 invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    pub id: String,
    pub name: String,
    pub step_type: String,
    pub phase: StepPhase,
    pub reason: String,
    pub first_execute_time: chrono::DateTime<chrono::Utc>,
    pub last_execute_time: chrono::DateTime<chrono::Utc>,
}

impl StepStatus {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            step_type: step_type.into(),
            phase: StepPhase::Pending,
            reason: String::new(),
            first_execute_time: now,
            last_execute_time: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_object_to_dotted_keys() {
        let v = serde_json::json!({"a": {"b": 1, "c": {"d": 2}}, "e": 3});
        let mut keys = flatten_keys(&v);
        keys.sort();
        assert_eq!(keys, vec!["a.b", "a.c.d", "e"]);
    }

    #[test]
    fn internal_policy_types_recognized() {
        assert!(is_internal_policy_type("override"));
        assert!(!is_internal_policy_type("custom-policy"));
    }
}
