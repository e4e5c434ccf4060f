//! Parser (spec §4.2): walks an [`ApplicationDocument`] into a [`ParsedAppfile`],
//! resolving every component/trait/policy/workflow-step reference against the
//! [`TemplateLoader`] as it goes.

use std::collections::HashMap;

use oam_engine_core::error::CoreError;
use oam_engine_core::models::{
    is_internal_policy_type, Component, ParsedAppfile, PolicySpec, StepInput, StepOutput, Trait,
    WorkflowMode, WorkflowStepSpec,
};
use oam_engine_core::models::CapabilityKind;
use oam_engine_core::registry::DefinitionStore;
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::document::{ApplicationDocument, WorkflowStepDocument};
use crate::loader::TemplateLoader;

pub struct Parser<'a> {
    store: &'a dyn DefinitionStore,
}

impl<'a> Parser<'a> {
    pub fn new(store: &'a dyn DefinitionStore) -> Self {
        Self { store }
    }

    /// `Parse(app)` → ParsedAppfile (spec §4.2). `revision_name` is assigned by the
    /// caller's revision-management mechanism, which is out of this core's scope.
    #[instrument(skip(self, app), fields(app_name = %app.metadata.name))]
    pub async fn parse(
        &self,
        app: &ApplicationDocument,
        revision_name: &str,
    ) -> Result<ParsedAppfile, CoreError> {
        self.parse_inner(app, revision_name, None).await
    }

    /// `ParseFromRevision(app, revision)` (spec §4.2): resolves every capability via
    /// `LoadFromRevision` and cross-checks that every referenced workflow-step type
    /// exists in the revision's workflow-step-definitions map.
    #[instrument(skip(self, app), fields(app_name = %app.metadata.name, revision))]
    pub async fn parse_from_revision(
        &self,
        app: &ApplicationDocument,
        revision: &str,
    ) -> Result<ParsedAppfile, CoreError> {
        if let Some(workflow) = app.spec.workflow.as_ref() {
            for step in &workflow.steps {
                self.store
                    .get_definition_from_revision(CapabilityKind::WorkflowStep, &step.step_type, revision)
                    .await
                    .map_err(|_| {
                        CoreError::not_found_in_revision(
                            "workflow-step",
                            format!("{} (step \"{}\")", step.step_type, step.name),
                        )
                    })?;
            }
        }
        self.parse_inner(app, revision, Some(revision)).await
    }

    async fn parse_inner(
        &self,
        app: &ApplicationDocument,
        revision_name: &str,
        from_revision: Option<&str>,
    ) -> Result<ParsedAppfile, CoreError> {
        let loader = TemplateLoader::new(self.store);
        let mut appfile = ParsedAppfile::new(app.metadata.name.clone(), app.metadata.namespace.clone());
        appfile.labels = app.metadata.labels.clone();
        appfile.annotations = app.metadata.annotations.clone();
        appfile.revision_name = revision_name.to_string();
        appfile.revision_hash = compute_revision_hash(app, revision_name);

        let mut seen_component_names: HashMap<String, ()> = HashMap::new();

        for comp_doc in &app.spec.components {
            if seen_component_names.insert(comp_doc.name.clone(), ()).is_some() {
                return Err(CoreError::duplicate("component", &comp_doc.name));
            }

            let template = match from_revision {
                Some(rev) => {
                    loader
                        .load_from_revision(&comp_doc.component_type, CapabilityKind::Component, rev)
                        .await?
                }
                None => loader.load(&comp_doc.component_type, CapabilityKind::Component).await?,
            };

            let mut traits = Vec::new();
            let mut seen_trait_names: HashMap<String, ()> = HashMap::new();
            for trait_doc in &comp_doc.traits {
                if seen_trait_names.insert(trait_doc.trait_type.clone(), ()).is_some() {
                    return Err(CoreError::duplicate("trait", &trait_doc.trait_type));
                }

                let trait_record = match from_revision {
                    Some(rev) => {
                        self.store
                            .get_definition_from_revision(CapabilityKind::Trait, &trait_doc.trait_type, rev)
                            .await?
                    }
                    None => self.store.get_definition(CapabilityKind::Trait, &trait_doc.trait_type).await?,
                };
                let trait_template = match from_revision {
                    Some(rev) => {
                        loader
                            .load_from_revision(&trait_doc.trait_type, CapabilityKind::Trait, rev)
                            .await?
                    }
                    None => loader.load(&trait_doc.trait_type, CapabilityKind::Trait).await?,
                };

                let user_params = decode_properties(&trait_doc.properties)?;
                traits.push(Trait {
                    name: trait_doc.trait_type.clone(),
                    category: trait_template.category,
                    user_params,
                    template_str: trait_template.template_str.unwrap_or_default(),
                    health_policy: trait_template.health_policy,
                    custom_status: trait_template.custom_status,
                    workload_ref_path: trait_record.workload_ref_path.unwrap_or_default(),
                });

                appfile
                    .related_definitions
                    .entry(CapabilityKind::Trait)
                    .or_default()
                    .insert(trait_doc.trait_type.clone(), trait_template_copy(&trait_doc.trait_type, &trait_record));
            }

            let user_params = decode_properties(&comp_doc.properties)?;
            let category = template.category;
            appfile
                .related_definitions
                .entry(CapabilityKind::Component)
                .or_default()
                .insert(comp_doc.component_type.clone(), template.clone());

            appfile.components.push(Component {
                name: comp_doc.name.clone(),
                component_type: comp_doc.component_type.clone(),
                category,
                user_params,
                template,
                traits,
                scopes: comp_doc.scopes.clone(),
                patch: None,
            });
        }

        for policy_doc in &app.spec.policies {
            let is_internal = is_internal_policy_type(&policy_doc.policy_type);
            if !is_internal && is_empty_properties(&policy_doc.properties) {
                return Err(CoreError::validation(
                    &policy_doc.name,
                    "policy properties must not be empty",
                ));
            }

            if policy_doc.policy_type == "debug" {
                appfile.debug = true;
            }

            if policy_doc.policy_type == "override" {
                self.resolve_override_policy(&loader, &policy_doc.properties, &mut appfile, from_revision)
                    .await?;
            }

            appfile.policies.push(PolicySpec {
                name: policy_doc.name.clone(),
                policy_type: policy_doc.policy_type.clone(),
                properties: policy_doc.properties.clone(),
            });
        }

        if let Some(workflow) = app.spec.workflow.as_ref() {
            appfile.workflow_mode = Some(parse_workflow_mode(workflow.mode.as_deref()));
            for step_doc in &workflow.steps {
                appfile.workflow_steps.push(self.parse_workflow_step(step_doc, &loader, from_revision).await?);
            }
        }

        Ok(appfile)
    }

    async fn parse_workflow_step(
        &self,
        step_doc: &WorkflowStepDocument,
        loader: &TemplateLoader<'_>,
        from_revision: Option<&str>,
    ) -> Result<WorkflowStepSpec, CoreError> {
        let template = match from_revision {
            Some(rev) => {
                loader
                    .load_from_revision(&step_doc.step_type, CapabilityKind::WorkflowStep, rev)
                    .await?
            }
            None => loader.load(&step_doc.step_type, CapabilityKind::WorkflowStep).await?,
        };
        let _ = template; // Resolved purely to surface not-found errors early; the
                           // workflow engine re-resolves runners by step type at execution time.

        Ok(WorkflowStepSpec {
            name: step_doc.name.clone(),
            step_type: step_doc.step_type.clone(),
            properties: step_doc.properties.clone(),
            depends_on: step_doc.depends_on.clone(),
            inputs: step_doc
                .inputs
                .iter()
                .map(|i| StepInput {
                    from: i.from.clone(),
                    parameter_key: i.parameter_key.clone(),
                })
                .collect(),
            outputs: step_doc
                .outputs
                .iter()
                .map(|o| StepOutput {
                    name: o.name.clone(),
                    value_from: o.value_from.clone(),
                })
                .collect(),
            timeout: step_doc.timeout.clone(),
        })
    }

    /// `override`-typed policies resolve their referenced component types so the
    /// definitions enter `related_definitions` (spec §4.2).
    async fn resolve_override_policy(
        &self,
        loader: &TemplateLoader<'_>,
        properties: &serde_json::Value,
        appfile: &mut ParsedAppfile,
        from_revision: Option<&str>,
    ) -> Result<(), CoreError> {
        let components = properties
            .get("components")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in components {
            let Some(component_type) = entry.get("type").and_then(|v| v.as_str()) else {
                continue;
            };
            let template = match from_revision {
                Some(rev) => {
                    loader
                        .load_from_revision(component_type, CapabilityKind::Component, rev)
                        .await?
                }
                None => loader.load(component_type, CapabilityKind::Component).await?,
            };
            appfile
                .related_definitions
                .entry(CapabilityKind::Component)
                .or_default()
                .insert(component_type.to_string(), template);
        }
        Ok(())
    }
}

fn trait_template_copy(
    name: &str,
    record: &oam_engine_core::registry::DefinitionRecord,
) -> oam_engine_core::models::Template {
    let mut t = oam_engine_core::models::Template::new(name.to_string(), record.kind);
    t.health_policy = record.health_policy.clone();
    t.custom_status = record.custom_status.clone();
    t.workload = record.workload.clone();
    t
}

fn decode_properties(raw: &serde_json::Value) -> Result<HashMap<String, serde_json::Value>, CoreError> {
    match raw {
        serde_json::Value::Null => Ok(HashMap::new()),
        serde_json::Value::Object(map) => Ok(map.clone().into_iter().collect()),
        other => Err(CoreError::validation(
            "<properties>",
            format!("expected a JSON object, got {other}"),
        )),
    }
}

fn is_empty_properties(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn parse_workflow_mode(mode: Option<&str>) -> WorkflowMode {
    match mode {
        Some("dag") | Some("DAG") => WorkflowMode::Dag,
        _ => WorkflowMode::Sequential,
    }
}

/// `{appRevisionName}:{specHash}` unless `workflow.oam.dev/publish-version` is set
/// (spec §3 invariants).
fn compute_revision_hash(app: &ApplicationDocument, revision_name: &str) -> String {
    if let Some(publish_version) = app.metadata.annotations.get(crate::document::ANNOTATION_PUBLISH_VERSION) {
        return publish_version.clone();
    }
    let spec_bytes = serde_json::to_vec(&app.spec).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let spec_hash = format!("{:x}", hasher.finalize());
    format!("{revision_name}:{spec_hash}")
}
