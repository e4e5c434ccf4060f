//! Boundary traits for the external collaborators the core depends on but does not
//! implement (spec §1, §6): the definition store backing the Template Loader, and
//! the cluster gateway backing the Ref-Object Resolver and eventual dispatch.
//!
//! Concrete implementations (a CRD-backed Kubernetes client, a multi-cluster
//! gateway) live outside this crate; `oam-engine-core::testing` provides
//! in-memory stand-ins for exercising the render and workflow pipelines.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::models::{CapabilityKind, InfraTemplateType, WorkloadGvk};

/// Helm chart reference for an `embedded-chart` schematic (spec §4.1, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmSpec {
    pub repository: String,
    pub chart: String,
    pub version: Option<String>,
}

/// Infra-as-code module reference (spec §4.1, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraSpec {
    pub template_type: InfraTemplateType,
    /// Inline HCL body, when `template_type == Hcl`.
    pub hcl: Option<String>,
    /// Remote module reference, when `template_type == Remote`.
    pub remote: Option<String>,
    pub provider_ref: Option<String>,
    pub connection_secret_ref: Option<String>,
}

/// The union of schematic shapes a raw definition may carry (spec §4.1).
///
/// Exactly one variant is populated per definition; `Extension` is the legacy
/// fallback where a `template` string is embedded in a generic JSON blob instead
/// of a dedicated schematic field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Schematic {
    TemplateLanguage(String),
    EmbeddedChart(HelmSpec),
    RawManifest(Value),
    InfraAsCode(InfraSpec),
    Extension(Value),
}

/// A raw capability definition as read from the definition store, before the
/// Template Loader assembles it into a [`crate::models::Template`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub name: String,
    pub kind: CapabilityKind,
    pub schematic: Schematic,
    pub health_policy: Option<String>,
    pub custom_status: Option<String>,
    pub workload: Option<WorkloadGvk>,
    /// Trait definitions only (spec §3 invariants, §4.7).
    pub workload_ref_path: Option<String>,
    /// Raw-manifest parameter schema (spec §4.6): name -> (value type, field paths).
    pub parameter_schema: HashMap<String, RawParameterSpec>,
}

/// One raw-manifest parameter's declared type and injection points (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawParameterType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParameterSpec {
    pub value_type: RawParameterType,
    pub field_paths: Vec<String>,
    pub required: bool,
}

/// Resolves capability definitions by (kind, name), either from live state or a
/// frozen revision (spec §4.1).
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Live-state lookup.
    async fn get_definition(
        &self,
        kind: CapabilityKind,
        name: &str,
    ) -> Result<DefinitionRecord, CoreError>;

    /// Frozen-revision lookup; distinct error variant on miss (spec §4.1).
    async fn get_definition_from_revision(
        &self,
        kind: CapabilityKind,
        name: &str,
        revision: &str,
    ) -> Result<DefinitionRecord, CoreError>;

    /// REST-mapper fallback used by `Load` when a component's kind is unknown and
    /// the legacy `workload` kind must be resolved to a concrete GVK (spec §4.1).
    async fn resolve_workload_gvk(&self, resource_name: &str) -> Result<WorkloadGvk, CoreError>;
}

/// A GVK + namespaced name, the unit the cluster gateway operates on (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// Dispatch/fetch boundary to target clusters (spec §1, §4.8, §6). Covers both
/// the ref-object resolver's read path and (conceptually) the gateway's dispatch
/// of rendered manifests, which is entirely out of this core's scope.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn get_object(&self, cluster: &str, key: &ObjectKey) -> Result<Value, CoreError>;

    async fn list_objects(
        &self,
        cluster: &str,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &HashMap<String, String>,
    ) -> Result<Vec<Value>, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_equality_ignores_unrelated_fields() {
        let a = ObjectKey {
            api_version: "v1".into(),
            kind: "Service".into(),
            namespace: Some("default".into()),
            name: "web".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
