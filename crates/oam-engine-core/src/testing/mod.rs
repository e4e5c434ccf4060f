//! In-memory fixtures for exercising the render and workflow pipelines without a
//! live cluster or definition store. Always compiled (not `#[cfg(test)]`-gated) so
//! downstream crates can depend on it from their own dev-dependencies.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::models::{CapabilityKind, WorkloadGvk};
use crate::registry::{ClusterGateway, DefinitionRecord, DefinitionStore, ObjectKey};

/// A process-local [`DefinitionStore`] backed by two maps (live + per-revision).
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    live: RwLock<HashMap<(CapabilityKind, String), DefinitionRecord>>,
    revisions: RwLock<HashMap<(String, CapabilityKind, String), DefinitionRecord>>,
    workload_gvks: RwLock<HashMap<String, WorkloadGvk>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: DefinitionRecord) {
        let key = (record.kind, record.name.clone());
        self.live.write().unwrap().insert(key, record);
    }

    pub fn insert_in_revision(&self, revision: impl Into<String>, record: DefinitionRecord) {
        let key = (revision.into(), record.kind, record.name.clone());
        self.revisions.write().unwrap().insert(key, record);
    }

    pub fn register_workload_gvk(&self, resource_name: impl Into<String>, gvk: WorkloadGvk) {
        self.workload_gvks
            .write()
            .unwrap()
            .insert(resource_name.into(), gvk);
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn get_definition(
        &self,
        kind: CapabilityKind,
        name: &str,
    ) -> Result<DefinitionRecord, CoreError> {
        self.live
            .read()
            .unwrap()
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::not_found(kind.to_string(), name))
    }

    async fn get_definition_from_revision(
        &self,
        kind: CapabilityKind,
        name: &str,
        revision: &str,
    ) -> Result<DefinitionRecord, CoreError> {
        self.revisions
            .read()
            .unwrap()
            .get(&(revision.to_string(), kind, name.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::not_found_in_revision(kind.to_string(), name))
    }

    async fn resolve_workload_gvk(&self, resource_name: &str) -> Result<WorkloadGvk, CoreError> {
        self.workload_gvks
            .read()
            .unwrap()
            .get(resource_name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("workload", resource_name))
    }
}

/// A process-local [`ClusterGateway`] backed by a flat object map, keyed by
/// `(cluster, api_version, kind, namespace, name)`.
#[derive(Debug, Default)]
pub struct InMemoryClusterGateway {
    objects: RwLock<HashMap<(String, String, String, Option<String>, String), Value>>,
}

impl InMemoryClusterGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, cluster: impl Into<String>, key: ObjectKey, object: Value) {
        let cluster = cluster.into();
        self.objects.write().unwrap().insert(
            (cluster, key.api_version, key.kind, key.namespace, key.name),
            object,
        );
    }
}

#[async_trait]
impl ClusterGateway for InMemoryClusterGateway {
    async fn get_object(&self, cluster: &str, key: &ObjectKey) -> Result<Value, CoreError> {
        self.objects
            .read()
            .unwrap()
            .get(&(
                cluster.to_string(),
                key.api_version.clone(),
                key.kind.clone(),
                key.namespace.clone(),
                key.name.clone(),
            ))
            .cloned()
            .ok_or_else(|| CoreError::not_found(&key.kind, &key.name))
    }

    async fn list_objects(
        &self,
        cluster: &str,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &HashMap<String, String>,
    ) -> Result<Vec<Value>, CoreError> {
        let objects = self.objects.read().unwrap();
        let matches = objects
            .iter()
            .filter(|((c, av, k, ns, _), _)| {
                c == cluster
                    && av == api_version
                    && k == kind
                    && namespace.map(|n| ns.as_deref() == Some(n)).unwrap_or(true)
            })
            .filter(|(_, obj)| label_selector_matches(obj, label_selector))
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(matches)
    }
}

fn label_selector_matches(object: &Value, selector: &HashMap<String, String>) -> bool {
    if selector.is_empty() {
        return true;
    }
    let labels = object
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.as_object());
    match labels {
        Some(labels) => selector
            .iter()
            .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str())),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Schematic;

    fn sample_record() -> DefinitionRecord {
        DefinitionRecord {
            name: "webservice".into(),
            kind: CapabilityKind::Component,
            schematic: Schematic::TemplateLanguage("output: {}".into()),
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
    async fn definition_store_round_trips_live_record() {
        let store = InMemoryDefinitionStore::new();
        store.insert(sample_record());
        let found = store
            .get_definition(CapabilityKind::Component, "webservice")
            .await
            .unwrap();
        assert_eq!(found.name, "webservice");
    }

    #[tokio::test]
    async fn definition_store_reports_not_found_in_revision_distinctly() {
        let store = InMemoryDefinitionStore::new();
        let err = store
            .get_definition_from_revision(CapabilityKind::Component, "missing", "rev-1")
            .await
            .unwrap_err();
        assert!(err.is_not_found_in_app_revision());
    }

    #[tokio::test]
    async fn cluster_gateway_filters_by_label_selector() {
        let gw = InMemoryClusterGateway::new();
        let key = ObjectKey {
            api_version: "v1".into(),
            kind: "Service".into(),
            namespace: Some("default".into()),
            name: "web".into(),
        };
        gw.put(
            "local",
            key,
            serde_json::json!({"metadata": {"labels": {"app": "web"}}}),
        );
        let mut selector = HashMap::new();
        selector.insert("app".to_string(), "web".to_string());
        let found = gw
            .list_objects("local", "v1", "Service", Some("default"), &selector)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        selector.insert("app".to_string(), "other".to_string());
        let found = gw
            .list_objects("local", "v1", "Service", Some("default"), &selector)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
