//! Component Renderer (spec §4.5, §4.6): produces a [`ComponentManifest`] from
//! one parsed [`Component`], dispatching on its template category.

use oam_engine_core::error::CoreError;
use oam_engine_core::models::{
    AuxiliaryOutput, Component, ComponentManifest, InfraTemplateType, PackagedWorkloadResources,
    TemplateCategory,
};
use oam_engine_core::process::{AppMeta, ProcessContext};
use oam_engine_core::registry::RawParameterType;
use serde_json::Value;
use tracing::instrument;

use crate::engine::AbstractEngine;
use crate::evaluator::TemplateEvaluator;

/// Well-known keys on infra-as-code parameters that route to typed fields on the
/// CR payload rather than the free-form variable set (spec §4.5).
const INFRA_WELL_KNOWN_KEYS: &[&str] = &["providerRef", "connectionSecretRef"];

pub struct ComponentRenderer<'a> {
    engine: AbstractEngine<'a>,
}

impl<'a> ComponentRenderer<'a> {
    pub fn new(evaluator: &'a dyn TemplateEvaluator) -> Self {
        Self { engine: AbstractEngine::new(evaluator) }
    }

    #[instrument(skip(self, component, app), fields(component = %component.name))]
    pub async fn render(&self, component: &Component, app: &AppMeta) -> Result<ComponentManifest, CoreError> {
        match component.template.category {
            TemplateCategory::TemplateLanguage => self.render_template_language(component, app).await,
            TemplateCategory::EmbeddedChart => self.render_embedded_chart(component, app).await,
            TemplateCategory::RawManifest => self.render_raw_manifest(component, app).await,
            TemplateCategory::InfraAsCode => self.render_infra_as_code(component, app),
        }
    }

    async fn render_template_language(
        &self,
        component: &Component,
        app: &AppMeta,
    ) -> Result<ComponentManifest, CoreError> {
        let params = user_params_value(component);
        let template_str = component.template.template_str.as_deref().ok_or_else(|| {
            CoreError::render(
                format!("base template app={}", app.app_name),
                "component template has no template string",
            )
        })?;

        let mut ctx = ProcessContext::new(app.clone(), params.clone());
        self.engine
            .complete(&mut ctx, template_str, &params)
            .await
            .map_err(|e| CoreError::render(format!("base template app={}", app.app_name), e.to_string()))?;

        let (base, workload_auxes) = ctx.output();
        let mut auxiliaries: Vec<AuxiliaryOutput> = workload_auxes
            .into_iter()
            .map(|(name, object)| AuxiliaryOutput {
                name: Some(name),
                trait_type: String::new(),
                resource_name: None,
                object,
            })
            .collect();

        auxiliaries.extend(self.render_traits(component, &ctx, app).await?);

        let (base, auxiliaries) = apply_patch(component, base, auxiliaries)?;

        Ok(ComponentManifest {
            name: component.name.clone(),
            namespace: app.namespace.clone(),
            revision_name: app.revision.clone(),
            primary: base,
            auxiliaries,
            packaged_workload_resources: None,
        })
    }

    async fn render_traits(
        &self,
        component: &Component,
        ctx: &ProcessContext,
        _app: &AppMeta,
    ) -> Result<Vec<AuxiliaryOutput>, CoreError> {
        let mut out = Vec::new();
        for trait_ in &component.traits {
            let params = Value::Object(trait_.user_params.clone().into_iter().collect());
            let produced = self
                .engine
                .complete_trait(ctx, &trait_.template_str, &params)
                .await
                .map_err(|e| {
                    CoreError::render(format!("trait={}", trait_.name), e.to_string())
                })?;
            for (name, object) in produced {
                out.push(AuxiliaryOutput {
                    name,
                    trait_type: trait_.name.clone(),
                    resource_name: None,
                    object,
                });
            }
        }
        Ok(out)
    }

    /// Embedded-chart: an empty base carrying only the declared workload GVK (so
    /// traits can reference it), plus a packaged release + repository pair (spec
    /// §4.5).
    async fn render_embedded_chart(
        &self,
        component: &Component,
        app: &AppMeta,
    ) -> Result<ComponentManifest, CoreError> {
        let gvk = component.template.workload.as_ref().ok_or_else(|| {
            CoreError::render("embedded-chart base", "component template has no declared workload GVK")
        })?;
        let base = serde_json::json!({
            "apiVersion": gvk.api_version,
            "kind": gvk.kind,
        });

        let helm = component.template.helm.as_ref().ok_or_else(|| {
            CoreError::render("embedded-chart release", "component template has no helm pointer")
        })?;
        let params = user_params_value(component);
        let release = serde_json::json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2beta1",
            "kind": "HelmRelease",
            "spec": {
                "chart": {
                    "spec": {
                        "chart": helm.chart,
                        "version": helm.version,
                    },
                },
                "values": params,
            },
        });
        let repository = serde_json::json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1beta1",
            "kind": "HelmRepository",
            "spec": {
                "url": helm.repository,
            },
        });

        let mut ctx = ProcessContext::new(app.clone(), params);
        ctx.set_base(base.clone());
        let auxiliaries = self.render_traits(component, &ctx, app).await?;
        let (base, auxiliaries) = apply_patch(component, base, auxiliaries)?;

        Ok(ComponentManifest {
            name: component.name.clone(),
            namespace: app.namespace.clone(),
            revision_name: app.revision.clone(),
            primary: base,
            auxiliaries,
            packaged_workload_resources: Some(PackagedWorkloadResources { release, repository }),
        })
    }

    /// Raw-manifest: overlay user parameters onto the decoded raw object at
    /// declared field paths, then run the result through the template-language
    /// path (spec §4.5, §4.6).
    async fn render_raw_manifest(
        &self,
        component: &Component,
        app: &AppMeta,
    ) -> Result<ComponentManifest, CoreError> {
        let raw = component.template.raw_manifest.clone().ok_or_else(|| {
            CoreError::render("raw-manifest base", "component template has no raw manifest")
        })?;
        let overlaid = inject_raw_parameters(component, raw)?;

        let mut ctx = ProcessContext::new(app.clone(), user_params_value(component));
        ctx.set_base(overlaid);
        let auxiliaries = self.render_traits(component, &ctx, app).await?;
        let (base, _) = ctx.output();
        let (base, auxiliaries) = apply_patch(component, base, auxiliaries)?;

        Ok(ComponentManifest {
            name: component.name.clone(),
            namespace: app.namespace.clone(),
            revision_name: app.revision.clone(),
            primary: base,
            auxiliaries,
            packaged_workload_resources: None,
        })
    }

    /// Infra-as-code: marshal params into a CR payload with provider/connection
    /// references split out of the free-form variable set (spec §4.5).
    fn render_infra_as_code(&self, component: &Component, app: &AppMeta) -> Result<ComponentManifest, CoreError> {
        let infra = component.template.infra.as_ref().ok_or_else(|| {
            CoreError::render("infra-as-code base", "component template has no infra spec")
        })?;

        let mut variables = serde_json::Map::new();
        let mut provider_ref = infra.provider_ref.clone();
        let mut connection_secret_ref = infra.connection_secret_ref.clone();
        for (k, v) in &component.user_params {
            match k.as_str() {
                "providerRef" => provider_ref = v.as_str().map(str::to_string).or(provider_ref),
                "connectionSecretRef" => {
                    connection_secret_ref = v.as_str().map(str::to_string).or(connection_secret_ref)
                }
                _ if !INFRA_WELL_KNOWN_KEYS.contains(&k.as_str()) => {
                    variables.insert(k.clone(), v.clone());
                }
                _ => {}
            }
        }

        let configuration = match infra.template_type {
            InfraTemplateType::Hcl => serde_json::json!({"hcl": infra.hcl}),
            InfraTemplateType::Remote => serde_json::json!({"remote": infra.remote}),
        };

        let base = serde_json::json!({
            "apiVersion": "terraform.core.oam.dev/v1beta2",
            "kind": "Configuration",
            "spec": {
                "providerRef": provider_ref,
                "connectionSecretRef": connection_secret_ref,
                "configuration": configuration,
                "variable": Value::Object(variables),
            },
        });

        Ok(ComponentManifest {
            name: component.name.clone(),
            namespace: app.namespace.clone(),
            revision_name: app.revision.clone(),
            primary: base,
            auxiliaries: Vec::new(),
            packaged_workload_resources: None,
        })
    }
}

fn user_params_value(component: &Component) -> Value {
    Value::Object(component.user_params.clone().into_iter().collect())
}

/// Raw-manifest parameter injection (spec §4.6): typed values overlaid at
/// declared dotted field paths. Unknown parameters fail immediately; missing
/// required parameters fail with a distinct message.
fn inject_raw_parameters(component: &Component, mut raw: Value) -> Result<Value, CoreError> {
    let schema = &component.template.raw_parameter_schema;

    for name in component.user_params.keys() {
        if !schema.contains_key(name) {
            return Err(CoreError::validation(
                &component.name,
                format!("unknown parameter \"{name}\""),
            ));
        }
    }

    for (name, spec) in schema {
        let value = component.user_params.get(name);
        let value = match value {
            Some(v) => v,
            None if spec.required => {
                return Err(CoreError::validation(
                    &component.name,
                    format!("require parameter \"{name}\""),
                ))
            }
            None => continue,
        };

        check_raw_parameter_type(&component.name, name, spec.value_type, value)?;

        for path in &spec.field_paths {
            set_field_path(&mut raw, path, value.clone())?;
        }
    }

    Ok(raw)
}

fn check_raw_parameter_type(
    component_name: &str,
    param_name: &str,
    expected: RawParameterType,
    value: &Value,
) -> Result<(), CoreError> {
    let ok = match expected {
        RawParameterType::Number => value.is_number(),
        RawParameterType::String => value.is_string(),
        RawParameterType::Boolean => value.is_boolean(),
    };
    if ok {
        Ok(())
    } else {
        let type_name = match expected {
            RawParameterType::Number => "number",
            RawParameterType::String => "string",
            RawParameterType::Boolean => "boolean",
        };
        Err(CoreError::validation(
            component_name,
            format!("require \"{type_name}\" type parameter value for \"{param_name}\""),
        ))
    }
}

fn set_field_path(target: &mut Value, path: &str, value: Value) -> Result<(), CoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, prefix)) = segments.split_last() else {
        return Err(CoreError::invalid_field_path(path));
    };

    let mut cursor = target;
    for segment in prefix {
        if !cursor.is_object() {
            *cursor = Value::Object(serde_json::Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(serde_json::Map::new());
    }
    cursor
        .as_object_mut()
        .unwrap()
        .insert(last.to_string(), value);
    Ok(())
}

/// Patch application (spec §4.3): applied after all traits have been evaluated,
/// targeting `workload` and `traits[<name>]`.
fn apply_patch(
    component: &Component,
    mut base: Value,
    mut auxiliaries: Vec<AuxiliaryOutput>,
) -> Result<(Value, Vec<AuxiliaryOutput>), CoreError> {
    let Some(patch) = component.patch.as_ref() else {
        return Ok((base, auxiliaries));
    };

    if let Some(workload_patch) = patch.get("workload") {
        merge_json(&mut base, workload_patch);
    }

    if let Some(traits_patch) = patch.get("traits").and_then(Value::as_object) {
        for (name, trait_patch) in traits_patch {
            if let Some(aux) = auxiliaries
                .iter_mut()
                .find(|a| a.name.as_deref() == Some(name.as_str()))
            {
                merge_json(&mut aux.object, trait_patch);
            }
        }
    }

    Ok((base, auxiliaries))
}

fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                merge_json(
                    target_map.entry(k.clone()).or_insert(Value::Null),
                    v,
                );
            }
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StructuralEvaluator;
    use oam_engine_core::models::{CapabilityKind, Template, TemplateCategory as Cat, Trait, WorkloadGvk};
    use oam_engine_core::registry::RawParameterSpec;
    use std::collections::HashMap;

    fn app_meta() -> AppMeta {
        AppMeta {
            app_name: "web".into(),
            namespace: "default".into(),
            revision: "web-v1".into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            workflow_name: None,
            publish_version: None,
            component_type: "webservice".into(),
        }
    }

    fn template_language_component() -> Component {
        let mut template = Template::new("webservice", CapabilityKind::Component);
        template.category = Cat::TemplateLanguage;
        template.template_str = Some(
            serde_json::json!({
                "output": {"kind": "Deployment", "spec": {"image": "$parameter.image"}},
                "outputs": {"hpa": {"kind": "HorizontalPodAutoscaler"}},
            })
            .to_string(),
        );
        let mut user_params = HashMap::new();
        user_params.insert("image".to_string(), serde_json::json!("nginx"));

        Component {
            name: "frontend".into(),
            component_type: "webservice".into(),
            category: Cat::TemplateLanguage,
            user_params,
            template,
            traits: vec![Trait {
                name: "scaler".into(),
                category: Cat::TemplateLanguage,
                user_params: HashMap::new(),
                template_str: serde_json::json!({"output": {"kind": "Scaler"}}).to_string(),
                health_policy: None,
                custom_status: None,
                workload_ref_path: String::new(),
            }],
            scopes: vec![],
            patch: None,
        }
    }

    #[tokio::test]
    async fn renders_workload_and_both_auxiliary_sources() {
        let evaluator = StructuralEvaluator;
        let renderer = ComponentRenderer::new(&evaluator);
        let manifest = renderer.render(&template_language_component(), &app_meta()).await.unwrap();
        assert_eq!(manifest.primary["spec"]["image"], "nginx");
        assert_eq!(manifest.auxiliaries.len(), 2);
        assert!(manifest.auxiliaries.iter().any(|a| a.name.as_deref() == Some("hpa")));
        assert!(manifest.auxiliaries.iter().any(|a| a.trait_type == "scaler"));
    }

    #[tokio::test]
    async fn raw_manifest_injects_parameters_at_field_paths() {
        let mut template = Template::new("raw-deploy", CapabilityKind::Component);
        template.category = Cat::RawManifest;
        template.raw_manifest = Some(serde_json::json!({"kind": "Deployment", "spec": {"replicas": 1}}));
        template.raw_parameter_schema.insert(
            "replicas".to_string(),
            RawParameterSpec {
                value_type: RawParameterType::Number,
                field_paths: vec!["spec.replicas".to_string()],
                required: false,
            },
        );
        let mut user_params = HashMap::new();
        user_params.insert("replicas".to_string(), serde_json::json!(3));
        let component = Component {
            name: "db".into(),
            component_type: "raw-deploy".into(),
            category: Cat::RawManifest,
            user_params,
            template,
            traits: vec![],
            scopes: vec![],
            patch: None,
        };

        let evaluator = StructuralEvaluator;
        let renderer = ComponentRenderer::new(&evaluator);
        let manifest = renderer.render(&component, &app_meta()).await.unwrap();
        assert_eq!(manifest.primary["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn raw_manifest_rejects_unknown_parameter() {
        let mut template = Template::new("raw-deploy", CapabilityKind::Component);
        template.category = Cat::RawManifest;
        template.raw_manifest = Some(serde_json::json!({"kind": "Deployment"}));
        let mut user_params = HashMap::new();
        user_params.insert("bogus".to_string(), serde_json::json!(true));
        let component = Component {
            name: "db".into(),
            component_type: "raw-deploy".into(),
            category: Cat::RawManifest,
            user_params,
            template,
            traits: vec![],
            scopes: vec![],
            patch: None,
        };

        let evaluator = StructuralEvaluator;
        let renderer = ComponentRenderer::new(&evaluator);
        let err = renderer.render(&component, &app_meta()).await.unwrap_err();
        assert_eq!(err.kind(), oam_engine_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn patch_merges_onto_workload_after_traits() {
        let mut component = template_language_component();
        component.patch = Some(serde_json::json!({"workload": {"spec": {"image": "patched"}}}));
        let evaluator = StructuralEvaluator;
        let renderer = ComponentRenderer::new(&evaluator);
        let manifest = renderer.render(&component, &app_meta()).await.unwrap();
        assert_eq!(manifest.primary["spec"]["image"], "patched");
    }
}
