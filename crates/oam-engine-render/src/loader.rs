//! Template Loader (spec §4.1): resolves a named capability into an immutable
//! [`Template`], either from live state, a frozen revision, or a dry-run supplied
//! definition list.

use std::collections::HashMap;

use oam_engine_core::error::CoreError;
use oam_engine_core::models::{CapabilityKind, Template, TemplateCategory};
use oam_engine_core::registry::{DefinitionRecord, DefinitionStore, Schematic};
use tracing::instrument;

/// Loads [`Template`]s against a [`DefinitionStore`], with an optional dry-run
/// overlay consulted before falling through to live state.
pub struct TemplateLoader<'a> {
    store: &'a dyn DefinitionStore,
}

impl<'a> TemplateLoader<'a> {
    pub fn new(store: &'a dyn DefinitionStore) -> Self {
        Self { store }
    }

    /// `Load(capabilityName, capabilityKind)` (spec §4.1).
    #[instrument(skip(self), fields(capability_kind = %capability_kind, capability_name))]
    pub async fn load(
        &self,
        capability_name: &str,
        capability_kind: CapabilityKind,
    ) -> Result<Template, CoreError> {
        match self.store.get_definition(capability_kind, capability_name).await {
            Ok(record) => build_template(record),
            Err(err)
                if capability_kind == CapabilityKind::Component && err.kind() == oam_engine_core::error::ErrorKind::NotFound =>
            {
                // Legacy fallback: resolve via the REST mapper under the workload kind.
                let record = self
                    .store
                    .get_definition(CapabilityKind::Workload, capability_name)
                    .await?;
                let gvk = self.store.resolve_workload_gvk(capability_name).await?;
                let mut template = build_template(record)?;
                template.workload = Some(gvk);
                Ok(template)
            }
            Err(err) => Err(err),
        }
    }

    /// `LoadFromRevision(capabilityName, capabilityKind, revision)` (spec §4.1).
    #[instrument(skip(self), fields(capability_kind = %capability_kind, capability_name, revision))]
    pub async fn load_from_revision(
        &self,
        capability_name: &str,
        capability_kind: CapabilityKind,
        revision: &str,
    ) -> Result<Template, CoreError> {
        let record = self
            .store
            .get_definition_from_revision(capability_kind, capability_name, revision)
            .await?;
        build_template(record)
    }

    /// `DryRunLoad(capabilityName, capabilityKind, suppliedDefs)` (spec §4.1): consults
    /// `supplied_defs` first, then falls through to [`Self::load`].
    pub async fn dry_run_load(
        &self,
        capability_name: &str,
        capability_kind: CapabilityKind,
        supplied_defs: &HashMap<(CapabilityKind, String), DefinitionRecord>,
    ) -> Result<Template, CoreError> {
        if let Some(record) = supplied_defs.get(&(capability_kind, capability_name.to_string())) {
            return build_template(record.clone());
        }
        self.load(capability_name, capability_kind).await
    }
}

/// Populates exactly one category from the definition's schematic union (spec §4.1).
fn build_template(record: DefinitionRecord) -> Result<Template, CoreError> {
    let mut template = Template::new(record.name.clone(), record.kind);
    template.health_policy = record.health_policy;
    template.custom_status = record.custom_status;
    template.workload = record.workload;

    template.raw_parameter_schema = record.parameter_schema.clone();

    match record.schematic {
        Schematic::TemplateLanguage(s) => {
            template.category = TemplateCategory::TemplateLanguage;
            template.template_str = Some(s);
        }
        Schematic::EmbeddedChart(helm) => {
            template.category = TemplateCategory::EmbeddedChart;
            template.helm = Some(helm);
        }
        Schematic::RawManifest(obj) => {
            template.category = TemplateCategory::RawManifest;
            template.raw_manifest = Some(obj);
        }
        Schematic::InfraAsCode(spec) => {
            template.category = TemplateCategory::InfraAsCode;
            template.infra_type = Some(spec.template_type);
            template.infra = Some(spec);
        }
        Schematic::Extension(blob) => {
            let extracted = blob.get("template").and_then(|v| v.as_str());
            match extracted {
                Some(s) => {
                    template.category = TemplateCategory::TemplateLanguage;
                    template.template_str = Some(s.to_string());
                }
                None => {
                    return Err(CoreError::invalid_schema(format!(
                        "definition \"{}\": no known schematic and no extension template string",
                        record.name
                    )))
                }
            }
        }
    }

    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_engine_core::models::WorkloadGvk;
    use oam_engine_core::testing::InMemoryDefinitionStore;

    fn record(kind: CapabilityKind, name: &str, schematic: Schematic) -> DefinitionRecord {
        DefinitionRecord {
            name: name.to_string(),
            kind,
            schematic,
            health_policy: None,
            custom_status: None,
            workload: Some(WorkloadGvk {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
            }),
            workload_ref_path: None,
            parameter_schema: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn load_sets_template_language_category() {
        let store = InMemoryDefinitionStore::new();
        store.insert(record(
            CapabilityKind::Component,
            "webservice",
            Schematic::TemplateLanguage("output: {}".into()),
        ));
        let loader = TemplateLoader::new(&store);
        let template = loader
            .load("webservice", CapabilityKind::Component)
            .await
            .unwrap();
        assert_eq!(template.category, TemplateCategory::TemplateLanguage);
        assert_eq!(template.template_str.as_deref(), Some("output: {}"));
    }

    #[tokio::test]
    async fn load_extracts_template_from_extension_blob() {
        let store = InMemoryDefinitionStore::new();
        store.insert(record(
            CapabilityKind::Trait,
            "scaler",
            Schematic::Extension(serde_json::json!({"template": "output: {replicas: 1}"})),
        ));
        let loader = TemplateLoader::new(&store);
        let template = loader.load("scaler", CapabilityKind::Trait).await.unwrap();
        assert_eq!(template.category, TemplateCategory::TemplateLanguage);
    }

    #[tokio::test]
    async fn load_fails_on_extension_blob_without_template() {
        let store = InMemoryDefinitionStore::new();
        store.insert(record(
            CapabilityKind::Trait,
            "broken",
            Schematic::Extension(serde_json::json!({})),
        ));
        let loader = TemplateLoader::new(&store);
        let err = loader.load("broken", CapabilityKind::Trait).await.unwrap_err();
        assert_eq!(err.kind(), oam_engine_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn load_from_revision_reports_distinguishable_not_found() {
        let store = InMemoryDefinitionStore::new();
        let loader = TemplateLoader::new(&store);
        let err = loader
            .load_from_revision("missing", CapabilityKind::Component, "rev-1")
            .await
            .unwrap_err();
        assert!(err.is_not_found_in_app_revision());
    }
}
