//! Ref-Object Resolver (spec §4.8): for components that reference existing
//! cluster objects, fetch and sanitize them for re-dispatch.

use oam_engine_core::error::CoreError;
use oam_engine_core::registry::{ClusterGateway, ObjectKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

/// The local-cluster sentinel value (spec §4.8): a `cluster` field equal to this
/// means "do not switch context".
pub const LOCAL_CLUSTER: &str = "local";

/// Scope at which a ref-object selector may address objects (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityScope {
    Global,
    Cluster,
    Namespace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefSelector {
    pub group: Option<String>,
    pub resource: Option<String>,
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub label_selector: Option<std::collections::HashMap<String, String>>,
    pub namespace: Option<String>,
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefObjectProperties {
    #[serde(default)]
    pub objects: Vec<RefSelector>,
    #[serde(default)]
    pub urls: Vec<String>,
}

pub struct RefObjectResolver<'a> {
    gateway: &'a dyn ClusterGateway,
    scope: AvailabilityScope,
}

impl<'a> RefObjectResolver<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, scope: AvailabilityScope) -> Self {
        Self { gateway, scope }
    }

    #[instrument(skip(self, properties))]
    pub async fn resolve(&self, properties: &RefObjectProperties) -> Result<Vec<Value>, CoreError> {
        let mut resolved: Vec<(String, ObjectKey, Value)> = Vec::new();

        for selector in &properties.objects {
            self.validate_scope(selector)?;
            let (api_version, kind) = resolve_gvk(selector)?;
            let cluster = selector.cluster.clone().unwrap_or_else(|| LOCAL_CLUSTER.to_string());

            let objects = self.dispatch(selector, &api_version, &kind, &cluster).await?;
            for object in objects {
                let sanitized = sanitize(object);
                let key = object_key(&api_version, &kind, &sanitized);
                append_idempotent(&mut resolved, cluster.clone(), key, sanitized);
            }
        }

        Ok(resolved.into_iter().map(|(_, _, object)| object).collect())
    }

    fn validate_scope(&self, selector: &RefSelector) -> Result<(), CoreError> {
        if selector.name.is_some() && selector.label_selector.is_some() {
            return Err(CoreError::validation(
                "ref-object",
                "name and labelSelector must not both be set",
            ));
        }
        if self.scope == AvailabilityScope::Namespace && selector.cluster.is_some() {
            return Err(CoreError::validation(
                "ref-object",
                "namespace-scoped availability does not permit a cluster selector",
            ));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        selector: &RefSelector,
        api_version: &str,
        kind: &str,
        cluster: &str,
    ) -> Result<Vec<Value>, CoreError> {
        if let Some(name) = &selector.name {
            let key = ObjectKey {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                namespace: selector.namespace.clone(),
                name: name.clone(),
            };
            let object = self.gateway.get_object(cluster, &key).await?;
            Ok(vec![object])
        } else {
            let selector_labels = selector.label_selector.clone().unwrap_or_default();
            self.gateway
                .list_objects(cluster, api_version, kind, selector.namespace.as_deref(), &selector_labels)
                .await
        }
    }
}

fn resolve_gvk(selector: &RefSelector) -> Result<(String, String), CoreError> {
    if let (Some(group), Some(resource)) = (&selector.group, &selector.resource) {
        // REST-mapper resolution is an external collaborator concern; here we
        // derive the conventional `<group>/<version>` shape the mapper would
        // return, defaulting to `v1` when the group carries no explicit version.
        let api_version = if group.is_empty() { "v1".to_string() } else { format!("{group}/v1") };
        let kind = singular_to_kind(resource);
        return Ok((api_version, kind));
    }
    if let (Some(api_version), Some(kind)) = (&selector.api_version, &selector.kind) {
        return Ok((api_version.clone(), kind.clone()));
    }
    Err(CoreError::validation(
        "ref-object",
        "selector must set group+resource or apiVersion+kind",
    ))
}

fn singular_to_kind(resource: &str) -> String {
    let mut chars = resource.trim_end_matches('s').chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn object_key(api_version: &str, kind: &str, object: &Value) -> ObjectKey {
    let name = object
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let namespace = object
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .map(str::to_string);
    ObjectKey { api_version: api_version.to_string(), kind: kind.to_string(), namespace, name }
}

/// Appends idempotently: a later duplicate with the same cluster+GVK+namespaced
/// name replaces the earlier entry in place (spec §4.8).
fn append_idempotent(resolved: &mut Vec<(String, ObjectKey, Value)>, cluster: String, key: ObjectKey, object: Value) {
    if let Some(existing) = resolved.iter_mut().find(|(c, k, _)| c == &cluster && k == &key) {
        existing.2 = object;
    } else {
        resolved.push((cluster, key, object));
    }
}

/// Clears server-managed fields and, for Services with a real `clusterIP`,
/// drops the IP assignment so the object can be re-dispatched (spec §4.8).
fn sanitize(mut object: Value) -> Value {
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in ["resourceVersion", "generation", "uid", "ownerReferences", "managedFields", "deletionTimestamp"] {
            metadata.remove(field);
        }
    }
    if let Some(obj) = object.as_object_mut() {
        obj.remove("status");
    }

    if object.get("kind").and_then(Value::as_str) == Some("Service") {
        if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
            let keep_none = spec.get("clusterIP").and_then(Value::as_str) == Some("None");
            if !keep_none {
                spec.remove("clusterIP");
                spec.remove("clusterIPs");
            }
        }
    }

    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_engine_core::testing::InMemoryClusterGateway;
    use std::collections::HashMap;

    #[tokio::test]
    async fn rejects_selector_with_both_name_and_label_selector() {
        let gw = InMemoryClusterGateway::new();
        let resolver = RefObjectResolver::new(&gw, AvailabilityScope::Global);
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "web".to_string());
        let props = RefObjectProperties {
            objects: vec![RefSelector {
                group: None,
                resource: None,
                api_version: Some("v1".into()),
                kind: Some("Service".into()),
                name: Some("web".into()),
                label_selector: Some(labels),
                namespace: None,
                cluster: None,
            }],
            urls: vec![],
        };
        let err = resolver.resolve(&props).await.unwrap_err();
        assert_eq!(err.kind(), oam_engine_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn sanitizes_fetched_service_clearing_cluster_ip() {
        let gw = InMemoryClusterGateway::new();
        let key = ObjectKey { api_version: "v1".into(), kind: "Service".into(), namespace: Some("default".into()), name: "web".into() };
        gw.put(
            LOCAL_CLUSTER,
            key,
            serde_json::json!({
                "kind": "Service",
                "metadata": {"name": "web", "namespace": "default", "resourceVersion": "42", "uid": "abc"},
                "spec": {"clusterIP": "10.0.0.1"},
                "status": {"loadBalancer": {}},
            }),
        );
        let resolver = RefObjectResolver::new(&gw, AvailabilityScope::Global);
        let props = RefObjectProperties {
            objects: vec![RefSelector {
                group: None,
                resource: None,
                api_version: Some("v1".into()),
                kind: Some("Service".into()),
                name: Some("web".into()),
                label_selector: None,
                namespace: Some("default".into()),
                cluster: None,
            }],
            urls: vec![],
        };
        let objects = resolver.resolve(&props).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects[0].get("status").is_none());
        assert!(objects[0]["metadata"].get("resourceVersion").is_none());
        assert!(objects[0]["spec"].get("clusterIP").is_none());
    }
}
