//! Raw Application document shape (spec §6 External Interfaces): what a user
//! submits, before the [`crate::parser::Parser`] resolves it against capability
//! definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub traits: Vec<TraitDocument>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraitDocument {
    #[serde(rename = "type")]
    pub trait_type: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStepInputDocument {
    pub from: String,
    #[serde(default)]
    pub parameter_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStepOutputDocument {
    pub name: String,
    pub value_from: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStepDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<WorkflowStepInputDocument>,
    #[serde(default)]
    pub outputs: Vec<WorkflowStepOutputDocument>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub steps: Vec<WorkflowStepDocument>,
    /// Named workflow reused across applications; resolved externally. Parsing
    /// fails loudly if both `steps` and `ref` are empty/absent and a workflow
    /// section is present at all.
    #[serde(rename = "ref", default)]
    pub workflow_ref: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub components: Vec<ComponentDocument>,
    #[serde(default)]
    pub policies: Vec<PolicyDocument>,
    #[serde(default)]
    pub workflow: Option<WorkflowDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationDocument {
    pub metadata: ApplicationMetadata,
    pub spec: ApplicationSpec,
}

pub const ANNOTATION_PUBLISH_VERSION: &str = "workflow.oam.dev/publish-version";
pub const ANNOTATION_WORKFLOW_NAME: &str = "app.oam.dev/workflow-name";
pub const ANNOTATION_FILTER_LABEL_KEYS: &str = "app.oam.dev/filter-label-keys";
pub const ANNOTATION_FILTER_ANNOTATION_KEYS: &str = "app.oam.dev/filter-annotation-keys";
pub const ANNOTATION_RESOURCE_URL: &str = "app.oam.dev/resource-url";
