//! Assembler (spec §4.7): stamps the cross-cutting operational contract
//! (naming, namespacing, labels, annotations, trait→workload back-references)
//! onto a rendered [`ComponentManifest`].

use std::collections::HashMap;

use base64::Engine as _;
use oam_engine_core::error::CoreError;
use oam_engine_core::models::ComponentManifest;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::instrument;

const LABEL_APP_NAME: &str = "app.oam.dev/name";
const LABEL_APP_NAMESPACE: &str = "app.oam.dev/namespace";
const LABEL_APP_REVISION: &str = "app.oam.dev/appRevision";
const LABEL_APP_COMPONENT: &str = "app.oam.dev/component";
const LABEL_RESOURCE_TYPE: &str = "app.oam.dev/resourceType";
const LABEL_TRAIT_TYPE: &str = "trait.oam.dev/type";
const LABEL_TRAIT_RESOURCE: &str = "trait.oam.dev/resource";

const RESOURCE_TYPE_WORKLOAD: &str = "WORKLOAD";
const RESOURCE_TYPE_TRAIT: &str = "TRAIT";

/// Trait-type values that are pure markers and never receive a workload
/// back-reference (spec §4.7 step 4).
const NO_BACKREF_TRAIT_TYPES: &[&str] = &["AuxiliaryWorkload"];

/// Identity and filtering inputs the assembler needs beyond the manifest itself;
/// everything here comes from the application document, not the render pipeline
/// (spec §4.7, §6).
pub struct AssemblyContext<'a> {
    pub app_name: &'a str,
    pub app_namespace: &'a str,
    pub app_revision: &'a str,
    pub component_name: &'a str,
    pub app_labels: &'a HashMap<String, String>,
    pub app_annotations: &'a HashMap<String, String>,
    pub filter_label_keys: &'a [String],
    pub filter_annotation_keys: &'a [String],
    /// Maps a trait's capability name to its declared `workloadRefPath` (spec
    /// §4.7 step 4), keyed the same way `Trait::name` is.
    pub trait_ref_paths: &'a HashMap<String, String>,
}

pub struct Assembler;

impl Assembler {
    /// `SetOAMContract(manifest)` (spec §4.7): mutates the manifest in place.
    #[instrument(skip(manifest, ctx), fields(component = %ctx.component_name))]
    pub fn set_oam_contract(manifest: &mut ComponentManifest, ctx: &AssemblyContext) -> Result<(), CoreError> {
        let common_labels = common_labels(ctx);

        stamp_primary(manifest, ctx, &common_labels)?;
        let workload_ref = workload_ref(&manifest.primary)?;

        for aux in manifest.auxiliaries.iter_mut() {
            stamp_auxiliary(aux, ctx, &common_labels)?;

            if NO_BACKREF_TRAIT_TYPES.contains(&aux.trait_type.as_str()) {
                continue;
            }
            let Some(ref_path) = ctx.trait_ref_paths.get(&aux.trait_type) else {
                continue;
            };
            if ref_path.is_empty() {
                continue;
            }
            write_object_reference(&mut aux.object, ref_path, &workload_ref)?;
        }

        Ok(())
    }
}

fn common_labels(ctx: &AssemblyContext) -> HashMap<String, String> {
    let mut labels = ctx.app_labels.clone();
    labels.insert(LABEL_APP_NAME.to_string(), ctx.app_name.to_string());
    labels.insert(LABEL_APP_NAMESPACE.to_string(), ctx.app_namespace.to_string());
    labels.insert(LABEL_APP_REVISION.to_string(), ctx.app_revision.to_string());
    labels.insert(LABEL_APP_COMPONENT.to_string(), ctx.component_name.to_string());
    for key in ctx.filter_label_keys {
        labels.remove(key);
    }
    labels
}

fn stamp_primary(
    manifest: &mut ComponentManifest,
    ctx: &AssemblyContext,
    common_labels: &HashMap<String, String>,
) -> Result<(), CoreError> {
    let obj = manifest
        .primary
        .as_object_mut()
        .ok_or_else(|| CoreError::render("assemble primary", "rendered workload is not an object"))?;
    let metadata = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(serde_json::Map::new()))
        .as_object_mut()
        .ok_or_else(|| CoreError::render("assemble primary", "metadata field is not an object"))?;

    if metadata.get("name").and_then(Value::as_str).is_none() {
        metadata.insert("name".to_string(), Value::String(ctx.component_name.to_string()));
    }

    if obj.get("kind").and_then(Value::as_str) != Some("Namespace") {
        metadata.insert("namespace".to_string(), Value::String(ctx.app_namespace.to_string()));
    }

    merge_labels(metadata, common_labels, RESOURCE_TYPE_WORKLOAD, None, None);
    merge_annotations(metadata, ctx);
    Ok(())
}

fn stamp_auxiliary(
    aux: &mut oam_engine_core::models::AuxiliaryOutput,
    ctx: &AssemblyContext,
    common_labels: &HashMap<String, String>,
) -> Result<(), CoreError> {
    let obj = aux
        .object
        .as_object_mut()
        .ok_or_else(|| CoreError::render("assemble auxiliary", "rendered trait output is not an object"))?;
    let metadata = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(serde_json::Map::new()))
        .as_object_mut()
        .ok_or_else(|| CoreError::render("assemble auxiliary", "metadata field is not an object"))?;

    let name = match &aux.name {
        Some(name) => name.clone(),
        None => {
            let hash = deterministic_trait_hash(ctx.component_name, &aux.trait_type, &aux.object);
            format!("{}-{}-{}", ctx.component_name, aux.trait_type, hash)
        }
    };
    metadata.insert("name".to_string(), Value::String(name.clone()));
    metadata.insert("namespace".to_string(), Value::String(ctx.app_namespace.to_string()));
    aux.resource_name = Some(name);

    merge_labels(
        metadata,
        common_labels,
        RESOURCE_TYPE_TRAIT,
        Some(&aux.trait_type),
        aux.resource_name.as_deref(),
    );
    merge_annotations(metadata, ctx);
    Ok(())
}

fn merge_labels(
    metadata: &mut serde_json::Map<String, Value>,
    common_labels: &HashMap<String, String>,
    resource_type: &str,
    trait_type: Option<&str>,
    trait_resource: Option<&str>,
) {
    let labels = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(serde_json::Map::new()))
        .as_object_mut()
        .expect("labels field must be an object");
    for (k, v) in common_labels {
        labels.insert(k.clone(), Value::String(v.clone()));
    }
    labels.insert(LABEL_RESOURCE_TYPE.to_string(), Value::String(resource_type.to_string()));
    if let Some(trait_type) = trait_type {
        labels.insert(LABEL_TRAIT_TYPE.to_string(), Value::String(trait_type.to_string()));
    }
    if let Some(trait_resource) = trait_resource {
        labels.insert(LABEL_TRAIT_RESOURCE.to_string(), Value::String(trait_resource.to_string()));
    }
}

fn merge_annotations(metadata: &mut serde_json::Map<String, Value>, ctx: &AssemblyContext) {
    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(serde_json::Map::new()))
        .as_object_mut()
        .expect("annotations field must be an object");
    for (k, v) in ctx.app_annotations {
        if ctx.filter_annotation_keys.iter().any(|f| f == k) {
            continue;
        }
        annotations.insert(k.clone(), Value::String(v.clone()));
    }
}

fn workload_ref(primary: &Value) -> Result<Value, CoreError> {
    let api_version = primary.get("apiVersion").cloned().unwrap_or(Value::Null);
    let kind = primary.get("kind").cloned().unwrap_or(Value::Null);
    let name = primary
        .get("metadata")
        .and_then(|m| m.get("name"))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(serde_json::json!({
        "apiVersion": api_version,
        "kind": kind,
        "name": name,
    }))
}

/// Writes an ObjectReference to a dotted path on a trait object (spec §3
/// invariants, §4.7 step 4).
fn write_object_reference(target: &mut Value, path: &str, reference: &Value) -> Result<(), CoreError> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(CoreError::invalid_field_path(path));
    }
    let mut cursor = target;
    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_object() {
            return Err(CoreError::invalid_field_path(path));
        }
        cursor = cursor
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !cursor.is_object() {
        return Err(CoreError::invalid_field_path(path));
    }
    cursor
        .as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].to_string(), reference.clone());
    Ok(())
}

/// Trait name hash, stable over everything on the object except the revision
/// label (spec §3 invariants): the revision label is stripped from the hashed
/// view before digesting.
fn deterministic_trait_hash(component_name: &str, trait_type: &str, object: &Value) -> String {
    let mut stable = object.clone();
    if let Some(labels) = stable
        .get_mut("metadata")
        .and_then(|m| m.get_mut("labels"))
        .and_then(Value::as_object_mut)
    {
        labels.remove(LABEL_APP_REVISION);
    }
    let mut hasher = Sha256::new();
    hasher.update(component_name.as_bytes());
    hasher.update(trait_type.as_bytes());
    hasher.update(serde_json::to_vec(&stable).unwrap_or_default());
    let digest = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_engine_core::models::AuxiliaryOutput;

    fn ctx<'a>(
        labels: &'a HashMap<String, String>,
        annotations: &'a HashMap<String, String>,
        filter_labels: &'a [String],
        filter_annotations: &'a [String],
        trait_ref_paths: &'a HashMap<String, String>,
    ) -> AssemblyContext<'a> {
        AssemblyContext {
            app_name: "web",
            app_namespace: "default",
            app_revision: "web-v1",
            component_name: "frontend",
            app_labels: labels,
            app_annotations: annotations,
            filter_label_keys: filter_labels,
            filter_annotation_keys: filter_annotations,
            trait_ref_paths: trait_ref_paths,
        }
    }

    #[test]
    fn stamps_common_labels_and_namespace_on_primary() {
        let labels = HashMap::new();
        let annotations = HashMap::new();
        let filter_labels = vec![];
        let filter_annotations = vec![];
        let trait_ref_paths = HashMap::new();
        let c = ctx(&labels, &annotations, &filter_labels, &filter_annotations, &trait_ref_paths);

        let mut manifest = ComponentManifest {
            name: "frontend".into(),
            namespace: "default".into(),
            revision_name: "web-v1".into(),
            primary: serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"}),
            auxiliaries: vec![],
            packaged_workload_resources: None,
        };
        Assembler::set_oam_contract(&mut manifest, &c).unwrap();
        assert_eq!(manifest.primary["metadata"]["name"], "frontend");
        assert_eq!(manifest.primary["metadata"]["namespace"], "default");
        assert_eq!(
            manifest.primary["metadata"]["labels"][LABEL_APP_COMPONENT],
            "frontend"
        );
    }

    #[test]
    fn namespace_kind_is_not_namespaced_into_itself() {
        let labels = HashMap::new();
        let annotations = HashMap::new();
        let filter_labels = vec![];
        let filter_annotations = vec![];
        let trait_ref_paths = HashMap::new();
        let c = ctx(&labels, &annotations, &filter_labels, &filter_annotations, &trait_ref_paths);

        let mut manifest = ComponentManifest {
            name: "ns".into(),
            namespace: "default".into(),
            revision_name: "web-v1".into(),
            primary: serde_json::json!({"apiVersion": "v1", "kind": "Namespace"}),
            auxiliaries: vec![],
            packaged_workload_resources: None,
        };
        Assembler::set_oam_contract(&mut manifest, &c).unwrap();
        assert!(manifest.primary["metadata"].get("namespace").is_none());
    }

    #[test]
    fn writes_workload_ref_at_declared_path() {
        let labels = HashMap::new();
        let annotations = HashMap::new();
        let filter_labels = vec![];
        let filter_annotations = vec![];
        let mut trait_ref_paths = HashMap::new();
        trait_ref_paths.insert("scaler".to_string(), "spec.workloadRef".to_string());
        let c = ctx(&labels, &annotations, &filter_labels, &filter_annotations, &trait_ref_paths);

        let mut manifest = ComponentManifest {
            name: "frontend".into(),
            namespace: "default".into(),
            revision_name: "web-v1".into(),
            primary: serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"}),
            auxiliaries: vec![AuxiliaryOutput {
                name: None,
                trait_type: "scaler".into(),
                resource_name: None,
                object: serde_json::json!({"kind": "Scaler", "spec": {}}),
            }],
            packaged_workload_resources: None,
        };
        Assembler::set_oam_contract(&mut manifest, &c).unwrap();
        let workload_ref = &manifest.auxiliaries[0].object["spec"]["workloadRef"];
        assert_eq!(workload_ref["kind"], "Deployment");
        assert_eq!(workload_ref["name"], "frontend");
    }

    #[test]
    fn assembling_twice_is_idempotent() {
        let labels = HashMap::new();
        let annotations = HashMap::new();
        let filter_labels = vec![];
        let filter_annotations = vec![];
        let trait_ref_paths = HashMap::new();
        let c = ctx(&labels, &annotations, &filter_labels, &filter_annotations, &trait_ref_paths);

        let mut manifest = ComponentManifest {
            name: "frontend".into(),
            namespace: "default".into(),
            revision_name: "web-v1".into(),
            primary: serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"}),
            auxiliaries: vec![],
            packaged_workload_resources: None,
        };
        Assembler::set_oam_contract(&mut manifest, &c).unwrap();
        let once = manifest.primary.clone();
        Assembler::set_oam_contract(&mut manifest, &c).unwrap();
        assert_eq!(once, manifest.primary);
    }
}
