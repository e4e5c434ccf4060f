//! Workflow Context Store (spec §4.9): a persistent key/value record bound to
//! `(app-namespace, app-name, app-uid)`, holding per-component manifests,
//! workflow variables, and per-step in-memory counters.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oam_engine_core::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

/// Identifies one application's workflow context record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub namespace: String,
    pub app_name: String,
}

impl ContextKey {
    pub fn new(namespace: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), app_name: app_name.into() }
    }

    /// Record name external key-value backends use (spec §4.9, §6).
    pub fn store_name(&self) -> String {
        format!("workflow-{}", self.app_name)
    }

    fn cache_key(&self) -> String {
        format!("{}/{}", self.namespace, self.app_name)
    }
}

/// The serialized shape committed to the backing store (spec §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedContext {
    pub uid: String,
    /// Component name -> list of rendered manifest JSONs.
    pub components: HashMap<String, Vec<Value>>,
    /// The variables sub-tree, settable by path.
    pub vars: Value,
    /// prefix -> id -> value (backoff attempts, last/next execute timestamps).
    pub memory: HashMap<String, HashMap<String, Value>>,
}

/// The external persistence boundary (spec §1, §6): a CRD-backed ConfigMap-like
/// record in production, an in-memory map in [`crate::testing`].
#[async_trait]
pub trait WorkflowContextBackend: Send + Sync {
    async fn load(&self, key: &ContextKey) -> Result<Option<PersistedContext>, CoreError>;
    async fn save(&self, key: &ContextKey, record: PersistedContext) -> Result<(), CoreError>;
    /// Removes the backing record entirely (spec §5: cleanable by app-key on
    /// Finished/Terminated teardown).
    async fn clear(&self, key: &ContextKey) -> Result<(), CoreError>;
}

/// The per-tick working copy (spec §4.9, §5). All mutations land on this local
/// copy; [`Self::commit`] publishes them atomically. Readers within the same
/// tick observe their own writes because they read the same struct instance.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    key: ContextKey,
    uid: String,
    components: HashMap<String, Vec<Value>>,
    vars: Value,
    memory: HashMap<String, HashMap<String, Value>>,
}

impl WorkflowContext {
    /// `NewContext(app-ns, app-name, uid)` (spec §4.9).
    pub fn new_context(namespace: impl Into<String>, app_name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            key: ContextKey::new(namespace, app_name),
            uid: uid.into(),
            components: HashMap::new(),
            vars: Value::Object(serde_json::Map::new()),
            memory: HashMap::new(),
        }
    }

    /// `LoadContext(app-ns, app-name)` (spec §4.9).
    #[instrument(skip(backend))]
    pub async fn load_context(
        backend: &dyn WorkflowContextBackend,
        namespace: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let key = ContextKey::new(namespace, app_name);
        let persisted = backend
            .load(&key)
            .await?
            .ok_or_else(|| CoreError::store(format!("no workflow context found for {}", key.cache_key())))?;
        Ok(Self {
            key,
            uid: persisted.uid,
            components: persisted.components,
            vars: if persisted.vars.is_null() { Value::Object(serde_json::Map::new()) } else { persisted.vars },
            memory: persisted.memory,
        })
    }

    /// `SetVar(value, path…)` (spec §4.9).
    pub fn set_var(&mut self, value: Value, path: &[&str]) {
        set_path(&mut self.vars, path, value);
    }

    /// `GetVar(path…)` (spec §4.9).
    pub fn get_var(&self, path: &[&str]) -> Option<Value> {
        get_path(&self.vars, path)
    }

    /// `GetComponent(name)` (spec §4.9).
    pub fn get_component(&self, name: &str) -> Option<&[Value]> {
        self.components.get(name).map(Vec::as_slice)
    }

    /// `PatchComponent(name, patchValue)` (spec §4.9): merges onto the most
    /// recently rendered manifest for that component, appending when none exists.
    pub fn patch_component(&mut self, name: &str, patch_value: &Value) {
        let manifests = self.components.entry(name.to_string()).or_default();
        match manifests.last_mut() {
            Some(last) => merge_json(last, patch_value),
            None => manifests.push(patch_value.clone()),
        }
    }

    /// Replaces the rendered manifest list for one component (called by the
    /// `apply-component` runner after a fresh render).
    pub fn set_component(&mut self, name: &str, manifests: Vec<Value>) {
        self.components.insert(name.to_string(), manifests);
    }

    /// `SetValueInMemory(v, prefix, id)` (spec §4.9).
    pub fn set_value_in_memory(&mut self, value: Value, prefix: &str, id: &str) {
        self.memory.entry(prefix.to_string()).or_default().insert(id.to_string(), value);
    }

    /// `GetValueInMemory(prefix, id)` (spec §4.9).
    pub fn get_value_in_memory(&self, prefix: &str, id: &str) -> Option<&Value> {
        self.memory.get(prefix).and_then(|m| m.get(id))
    }

    /// `DeleteValueInMemory(prefix, id)` (spec §4.9).
    pub fn delete_value_in_memory(&mut self, prefix: &str, id: &str) {
        if let Some(m) = self.memory.get_mut(prefix) {
            m.remove(id);
        }
    }

    /// `IncreaseCountValueInMemory(prefix, id)` (spec §4.9): returns the new count.
    pub fn increase_count_value_in_memory(&mut self, prefix: &str, id: &str) -> u64 {
        let entry = self.memory.entry(prefix.to_string()).or_default().entry(id.to_string()).or_insert(Value::from(0u64));
        let next = entry.as_u64().unwrap_or(0) + 1;
        *entry = Value::from(next);
        next
    }

    /// Clears every per-id counter under `prefix` (spec §9 Open Question: step IDs
    /// can collide across revisions, so counters must be cleared before reuse).
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.memory.remove(prefix);
    }

    /// `Commit()` (spec §4.9): publishes this tick's mutations atomically.
    #[instrument(skip(self, backend))]
    pub async fn commit(&self, backend: &dyn WorkflowContextBackend) -> Result<(), CoreError> {
        let record = PersistedContext {
            uid: self.uid.clone(),
            components: self.components.clone(),
            vars: self.vars.clone(),
            memory: self.memory.clone(),
        };
        backend.save(&self.key, record).await
    }

    /// `StoreRef()` (spec §4.9): a typed reference to the backing record.
    pub fn store_ref(&self) -> ContextKey {
        self.key.clone()
    }
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }
    let mut cursor = root;
    for segment in &path[..path.len() - 1] {
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
    cursor.as_object_mut().unwrap().insert(path[path.len() - 1].to_string(), value);
}

fn get_path(root: &Value, path: &[&str]) -> Option<Value> {
    let mut cursor = root;
    for segment in path {
        cursor = cursor.get(segment)?;
    }
    Some(cursor.clone())
}

fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                merge_json(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Unix-timestamp pair tracked per step alongside its backoff attempt counter
/// (spec §4.9). Stored under the `exec-times` memory prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecuteTimes {
    pub last: i64,
    pub next: i64,
}

impl ExecuteTimes {
    pub fn now_with_next(next: DateTime<Utc>) -> Self {
        Self { last: Utc::now().timestamp(), next: next.timestamp() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_var_round_trip_nested_path() {
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        ctx.set_var(Value::from(99), &["score"]);
        assert_eq!(ctx.get_var(&["score"]), Some(Value::from(99)));
    }

    #[test]
    fn increase_count_value_in_memory_accumulates() {
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        assert_eq!(ctx.increase_count_value_in_memory("backoff", "step-1"), 1);
        assert_eq!(ctx.increase_count_value_in_memory("backoff", "step-1"), 2);
    }

    #[test]
    fn patch_component_merges_onto_last_manifest() {
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        ctx.set_component("frontend", vec![serde_json::json!({"spec": {"replicas": 1}})]);
        ctx.patch_component("frontend", &serde_json::json!({"spec": {"replicas": 3}}));
        assert_eq!(ctx.get_component("frontend").unwrap()[0]["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn commit_then_load_round_trips() {
        let backend = crate::testing::InMemoryWorkflowContextBackend::default();
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        ctx.set_var(Value::from("v1"), &["name"]);
        ctx.commit(&backend).await.unwrap();

        let reloaded = WorkflowContext::load_context(&backend, "default", "web").await.unwrap();
        assert_eq!(reloaded.get_var(&["name"]), Some(Value::from("v1")));
    }
}
