//! File-backed fixtures for the `DefinitionStore`/`ClusterGateway` boundary
//! traits: a thin disk-loading layer in front of the in-memory stand-ins
//! `oam-engine-core::testing` ships for exercising the render and workflow
//! pipelines, the only difference being where the seed data comes from.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use oam_engine_core::error::CoreError;
use oam_engine_core::models::{CapabilityKind, WorkloadGvk};
use oam_engine_core::registry::{ClusterGateway, DefinitionRecord, DefinitionStore, ObjectKey};
use oam_engine_core::testing::{InMemoryClusterGateway, InMemoryDefinitionStore};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::AppResult;
use crate::io;

/// On-disk shape of a capability-definitions fixture file.
#[derive(Debug, Default, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    definitions: Vec<DefinitionRecord>,
    #[serde(default)]
    workload_gvks: HashMap<String, WorkloadGvk>,
}

/// A [`DefinitionStore`] seeded once from a JSON or YAML fixture file at startup.
pub struct FileDefinitionStore {
    inner: InMemoryDefinitionStore,
}

impl FileDefinitionStore {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> AppResult<Self> {
        let file: DefinitionsFile = io::load(path)?;
        let inner = InMemoryDefinitionStore::new();
        for record in file.definitions {
            inner.insert(record);
        }
        for (resource_name, gvk) in file.workload_gvks {
            inner.register_workload_gvk(resource_name, gvk);
        }
        Ok(Self { inner })
    }
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn get_definition(&self, kind: CapabilityKind, name: &str) -> Result<DefinitionRecord, CoreError> {
        self.inner.get_definition(kind, name).await
    }

    async fn get_definition_from_revision(
        &self,
        kind: CapabilityKind,
        name: &str,
        revision: &str,
    ) -> Result<DefinitionRecord, CoreError> {
        self.inner.get_definition_from_revision(kind, name, revision).await
    }

    async fn resolve_workload_gvk(&self, resource_name: &str) -> Result<WorkloadGvk, CoreError> {
        self.inner.resolve_workload_gvk(resource_name).await
    }
}

/// One entry of a cluster-objects fixture file: an object the Ref-Object
/// Resolver can look up by cluster + GVK + namespaced name.
#[derive(Debug, Deserialize)]
struct ClusterObjectEntry {
    cluster: String,
    api_version: String,
    kind: String,
    #[serde(default)]
    namespace: Option<String>,
    name: String,
    object: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterObjectsFile {
    #[serde(default)]
    objects: Vec<ClusterObjectEntry>,
}

pub struct FileClusterGateway {
    inner: InMemoryClusterGateway,
}

impl FileClusterGateway {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> AppResult<Self> {
        let file: ClusterObjectsFile = io::load(path)?;
        let inner = InMemoryClusterGateway::new();
        for entry in file.objects {
            let key = ObjectKey {
                api_version: entry.api_version,
                kind: entry.kind,
                namespace: entry.namespace,
                name: entry.name,
            };
            inner.put(entry.cluster, key, entry.object);
        }
        Ok(Self { inner })
    }

    /// No ref-typed components in this run: an empty gateway still satisfies
    /// the trait, it just has nothing to resolve against.
    pub fn empty() -> Self {
        Self { inner: InMemoryClusterGateway::new() }
    }
}

#[async_trait]
impl ClusterGateway for FileClusterGateway {
    async fn get_object(&self, cluster: &str, key: &ObjectKey) -> Result<Value, CoreError> {
        self.inner.get_object(cluster, key).await
    }

    async fn list_objects(
        &self,
        cluster: &str,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &HashMap<String, String>,
    ) -> Result<Vec<Value>, CoreError> {
        self.inner.list_objects(cluster, api_version, kind, namespace, label_selector).await
    }
}
