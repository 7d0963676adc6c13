//! The Resource Store contract (spec §4.10) and an in-memory reference
//! implementation.
//!
//! The aggregator treats the store as a pluggable external collaborator
//! (spec §1/§6: "storage_backend.{module, class}"); `ResourceStore` is that
//! seam. `MemoryResourceStore` is grounded on the shape of the reference's
//! filesystem backend (`examples/original_source/storage_backend/backend_FS.py`)
//! with the directory tree replaced by a `HashMap<path, Value>`.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn read(&self, path: &str) -> CoreResult<Value>;

    /// Creates `object` at its `@odata.id`. Creates any intermediate
    /// collection object lazily, updates the parent collection's `Members`
    /// / `Members@odata.count`. `ActionNotAllowed` if the collection's
    /// containing entity does not exist; `AlreadyExists` on duplicate
    /// `@odata.id`.
    async fn write(&self, object: Value) -> CoreResult<Value>;

    /// Overwrites the whole object at `@odata.id`. `ResourceNotFound` if
    /// absent.
    async fn replace(&self, object: Value) -> CoreResult<Value>;

    /// Deep-merges `partial` into the stored object. `ResourceNotFound` if
    /// absent.
    async fn patch(&self, path: &str, partial: Value) -> CoreResult<Value>;

    /// Deletes the object, rewrites the containing collection, then prunes
    /// every `Links.*` back-reference to `path` found anywhere in the
    /// store. `ActionNotAllowed` on an empty path.
    async fn remove(&self, path: &str) -> CoreResult<()>;

    /// Returns `true` if an object is currently stored at `path`, without
    /// the cost of cloning it.
    async fn exists(&self, path: &str) -> bool;
}

pub struct MemoryResourceStore {
    objects: RwLock<HashMap<String, Value>>,
    /// Records the order resources were first written, for tests that
    /// check BFS parent-before-child ordering (spec §8 S6).
    write_order: RwLock<Vec<String>>,
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            write_order: RwLock::new(Vec::new()),
        }
    }

    /// Seeds the store with a resource without running collection
    /// bookkeeping -- used to bootstrap the service root and other
    /// aggregator-owned singletons at startup.
    pub async fn seed(&self, object: Value) {
        let path = object["@odata.id"].as_str().unwrap_or_default().to_string();
        self.objects.write().await.insert(path.clone(), object);
        self.write_order.write().await.push(path);
    }

    pub async fn write_order(&self) -> Vec<String> {
        self.write_order.read().await.clone()
    }

    fn parent_path(path: &str) -> Option<String> {
        let trimmed = path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if idx == 0 {
            None
        } else {
            Some(trimmed[..idx].to_string())
        }
    }

    fn last_segment(path: &str) -> &str {
        path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
    }

    fn default_collection(collection_path: &str) -> Value {
        let name = Self::last_segment(collection_path);
        json!({
            "@odata.id": collection_path,
            "@odata.type": format!("#{name}Collection.{name}Collection"),
            "Name": format!("{name} Collection"),
            "Members": [],
            "Members@odata.count": 0,
        })
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn read(&self, path: &str) -> CoreResult<Value> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::ResourceNotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }

    async fn write(&self, object: Value) -> CoreResult<Value> {
        let path = object
            .get("@odata.id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::PropertyNotFound("@odata.id".to_string()))?
            .to_string();

        let collection_path = Self::parent_path(&path);
        let mut objects = self.objects.write().await;

        if let Some(collection_path) = &collection_path {
            // A collection's containing entity must already exist: e.g. to
            // write /redfish/v1/Systems/1 the entity at /redfish/v1 (the
            // collection's parent) must be present.
            if let Some(container_path) = Self::parent_path(collection_path) {
                if !objects.contains_key(&container_path) {
                    return Err(CoreError::ActionNotAllowed);
                }
            }

            let collection = objects
                .entry(collection_path.clone())
                .or_insert_with(|| Self::default_collection(collection_path))
                .clone();

            if let Some(odata_type) = collection.get("@odata.type").and_then(Value::as_str) {
                if !crate::model::is_well_formed_collection_type(odata_type) {
                    return Err(CoreError::IllegalCollectionType(odata_type.to_string()));
                }
            }

            let members = collection
                .get("Members")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let duplicate = members
                .iter()
                .any(|m| m.get("@odata.id").and_then(Value::as_str) == Some(path.as_str()));
            if duplicate || objects.contains_key(&path) {
                return Err(CoreError::AlreadyExists(path));
            }

            let mut new_members = members;
            new_members.push(json!({ "@odata.id": path }));
            let mut collection = collection;
            let count = new_members.len();
            if let Value::Object(map) = &mut collection {
                map.insert("Members".to_string(), Value::Array(new_members));
                map.insert("Members@odata.count".to_string(), json!(count));
            }
            objects.insert(collection_path.clone(), collection);
        } else if objects.contains_key(&path) {
            return Err(CoreError::AlreadyExists(path));
        }

        objects.insert(path.clone(), object.clone());
        drop(objects);
        self.write_order.write().await.push(path);
        Ok(object)
    }

    async fn replace(&self, object: Value) -> CoreResult<Value> {
        let path = object
            .get("@odata.id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::PropertyNotFound("@odata.id".to_string()))?
            .to_string();
        let mut objects = self.objects.write().await;
        if !objects.contains_key(&path) {
            return Err(CoreError::ResourceNotFound(path));
        }
        objects.insert(path, object.clone());
        Ok(object)
    }

    async fn patch(&self, path: &str, partial: Value) -> CoreResult<Value> {
        let mut objects = self.objects.write().await;
        let existing = objects
            .get_mut(path)
            .ok_or_else(|| CoreError::ResourceNotFound(path.to_string()))?;
        deep_merge(existing, &partial);
        Ok(existing.clone())
    }

    async fn remove(&self, path: &str) -> CoreResult<()> {
        if path.is_empty() {
            return Err(CoreError::ActionNotAllowed);
        }
        let mut objects = self.objects.write().await;
        if objects.remove(path).is_none() {
            return Err(CoreError::ResourceNotFound(path.to_string()));
        }

        if let Some(collection_path) = Self::parent_path(path) {
            if let Some(Value::Object(collection)) = objects.get_mut(&collection_path) {
                if let Some(Value::Array(members)) = collection.get_mut("Members") {
                    members.retain(|m| m.get("@odata.id").and_then(Value::as_str) != Some(path));
                    let count = members.len();
                    collection.insert("Members@odata.count".to_string(), json!(count));
                }
            }
        }

        prune_back_references(&mut objects, path);
        Ok(())
    }
}

/// RFC7396-flavored merge: for each key in `patch`, recurse if both sides
/// are objects, otherwise overwrite. Applied from the document root, so in
/// practice every top-level key of `partial` is merged this way into
/// `target` (spec §4.10: "deep-merges top-level keys").
pub(crate) fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, patch_val),
                    None => {
                        target_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (target_slot, patch_val) => {
            *target_slot = patch_val.clone();
        }
    }
}

fn prune_back_references(objects: &mut HashMap<String, Value>, removed_path: &str) {
    for value in objects.values_mut() {
        let Some(links) = value.get_mut("Links") else {
            continue;
        };
        let Value::Object(links_map) = links else {
            continue;
        };
        let mut keys_to_delete = Vec::new();
        for (rel, target) in links_map.iter_mut() {
            match target {
                Value::Array(items) => {
                    items.retain(|item| item.get("@odata.id").and_then(Value::as_str) != Some(removed_path));
                    if items.is_empty() {
                        keys_to_delete.push(rel.clone());
                    }
                }
                Value::Object(obj) => {
                    if obj.get("@odata.id").and_then(Value::as_str) == Some(removed_path) {
                        keys_to_delete.push(rel.clone());
                    }
                }
                _ => {}
            }
        }
        for key in keys_to_delete {
            links_map.remove(&key);
        }
    }
}

pub fn new_collection_stub(collection_path: &str) -> Map<String, Value> {
    match MemoryResourceStore::default_collection(collection_path) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> MemoryResourceStore {
        let store = MemoryResourceStore::new();
        store
            .seed(json!({ "@odata.id": "/redfish/v1", "@odata.type": "#ServiceRoot.v1_15_0.ServiceRoot", "Id": "RootService" }))
            .await;
        store
    }

    #[tokio::test]
    async fn write_creates_collection_lazily_and_updates_count() {
        let store = seeded_store().await;
        let obj = json!({ "@odata.id": "/redfish/v1/Systems/1", "@odata.type": "#ComputerSystem.v1.ComputerSystem", "Id": "1" });
        store.write(obj).await.unwrap();

        let collection = store.read("/redfish/v1/Systems").await.unwrap();
        assert_eq!(collection["Members@odata.count"], 1);
        assert_eq!(collection["Members"][0]["@odata.id"], "/redfish/v1/Systems/1");
    }

    #[tokio::test]
    async fn write_rejects_duplicate_id() {
        let store = seeded_store().await;
        let obj = json!({ "@odata.id": "/redfish/v1/Systems/1", "@odata.type": "#ComputerSystem.v1.ComputerSystem", "Id": "1" });
        store.write(obj.clone()).await.unwrap();
        let err = store.write(obj).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn write_rejects_a_mistyped_preexisting_collection() {
        let store = seeded_store().await;
        store
            .seed(json!({
                "@odata.id": "/redfish/v1/Systems",
                "@odata.type": "#ComputerSystemCollection.v1_0_0.ComputerSystemCollection",
                "Members": [],
                "Members@odata.count": 0,
            }))
            .await;

        let obj = json!({ "@odata.id": "/redfish/v1/Systems/1", "@odata.type": "#ComputerSystem.v1.ComputerSystem", "Id": "1" });
        let err = store.write(obj).await.unwrap_err();
        assert!(matches!(err, CoreError::IllegalCollectionType(_)));
    }

    #[tokio::test]
    async fn write_rejects_missing_ancestor() {
        let store = MemoryResourceStore::new();
        let obj = json!({ "@odata.id": "/redfish/v1/Systems/1", "@odata.type": "#ComputerSystem.v1.ComputerSystem", "Id": "1" });
        let err = store.write(obj).await.unwrap_err();
        assert!(matches!(err, CoreError::ActionNotAllowed));
    }

    #[tokio::test]
    async fn patch_deep_merges_nested_objects() {
        let store = seeded_store().await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Systems/1",
                "@odata.type": "#ComputerSystem.v1.ComputerSystem",
                "Id": "1",
                "Oem": { "Sunfish_RM": { "ManagingAgent": { "@odata.id": "a1" } } }
            }))
            .await
            .unwrap();
        let patched = store
            .patch("/redfish/v1/Systems/1", json!({ "Oem": { "Other": "x" } }))
            .await
            .unwrap();
        assert_eq!(patched["Oem"]["Sunfish_RM"]["ManagingAgent"]["@odata.id"], "a1");
        assert_eq!(patched["Oem"]["Other"], "x");
    }

    #[tokio::test]
    async fn remove_prunes_back_references_and_collection_membership() {
        let store = seeded_store().await;
        store
            .write(json!({ "@odata.id": "/redfish/v1/Systems/1", "@odata.type": "#ComputerSystem.v1.ComputerSystem", "Id": "1" }))
            .await
            .unwrap();
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Chassis/1",
                "@odata.type": "#Chassis.v1.Chassis",
                "Id": "1",
                "Links": { "ComputerSystems": [{ "@odata.id": "/redfish/v1/Systems/1" }] }
            }))
            .await
            .unwrap();

        store.remove("/redfish/v1/Systems/1").await.unwrap();

        let collection = store.read("/redfish/v1/Systems").await.unwrap();
        assert_eq!(collection["Members@odata.count"], 0);

        let chassis = store.read("/redfish/v1/Chassis/1").await.unwrap();
        assert!(chassis["Links"].get("ComputerSystems").is_none());

        let err = store.remove("/redfish/v1/Systems/1").await.unwrap_err();
        assert!(matches!(err, CoreError::ResourceNotFound(_)));
    }
}
