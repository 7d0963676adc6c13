//! Subscription Index: in-memory inverted indexes keyed by registry prefix,
//! message id, resource type and origin subtree (spec §4.5), built on the
//! bucket shape of `examples/original_source/sunfish/events/subscription_handler.py`.

use crate::error::{CoreError, CoreResult};
use crate::store::ResourceStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default, Clone)]
struct SendExclude {
    to_send: Vec<String>,
    exclude: Vec<String>,
}

#[derive(Default)]
struct Indexes {
    registry_prefixes: HashMap<String, SendExclude>,
    message_ids: HashMap<String, SendExclude>,
    resource_types: HashMap<String, Vec<String>>,
    /// Keys may carry a `/*` suffix for subscriptions with
    /// `SubordinateResources: true`.
    origin_resources: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct SubscriptionIndex {
    inner: RwLock<Indexes>,
}

fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disjointness rules from spec §7: illegal if a prefix/id is both
    /// included and excluded, or an included message id's prefix is
    /// excluded wholesale.
    pub fn validate(payload: &Value) -> Result<(), CoreError> {
        let registry_prefixes: HashSet<String> = string_list(payload, "RegistryPrefixes").into_iter().collect();
        let exclude_prefixes: HashSet<String> = string_list(payload, "ExcludeRegistryPrefixes").into_iter().collect();
        let message_ids: HashSet<String> = string_list(payload, "MessageIds").into_iter().collect();
        let exclude_message_ids: HashSet<String> = string_list(payload, "ExcludeMessageIds").into_iter().collect();

        if registry_prefixes.intersection(&exclude_prefixes).next().is_some() {
            return Err(CoreError::IllegalSubscription);
        }
        if message_ids.intersection(&exclude_message_ids).next().is_some() {
            return Err(CoreError::IllegalSubscription);
        }
        for msg_id in &message_ids {
            if let Some(prefix) = msg_id.split('.').next() {
                if exclude_prefixes.contains(prefix) {
                    return Err(CoreError::IllegalSubscription);
                }
            }
        }
        Ok(())
    }

    /// Indexes `id` into every relevant bucket. Runs even if `validate`
    /// failed -- the validator is a warning gate, not a persistence gate
    /// (spec §7).
    pub async fn index_subscription(&self, id: &str, payload: &Value) {
        let mut idx = self.inner.write().await;

        for prefix in string_list(payload, "RegistryPrefixes") {
            idx.registry_prefixes.entry(prefix).or_default().to_send.push(id.to_string());
        }
        for prefix in string_list(payload, "ExcludeRegistryPrefixes") {
            idx.registry_prefixes.entry(prefix).or_default().exclude.push(id.to_string());
        }
        for mid in string_list(payload, "MessageIds") {
            idx.message_ids.entry(mid).or_default().to_send.push(id.to_string());
        }
        for mid in string_list(payload, "ExcludeMessageIds") {
            idx.message_ids.entry(mid).or_default().exclude.push(id.to_string());
        }
        for rtype in string_list(payload, "ResourceTypes") {
            idx.resource_types.entry(rtype).or_default().push(id.to_string());
        }

        let subordinate = payload.get("SubordinateResources").and_then(Value::as_bool).unwrap_or(false);
        if let Some(origins) = payload.get("OriginResources").and_then(Value::as_array) {
            for origin in origins {
                if let Some(origin_id) = origin.get("@odata.id").and_then(Value::as_str) {
                    let key = if subordinate {
                        format!("{origin_id}/*")
                    } else {
                        origin_id.to_string()
                    };
                    idx.origin_resources.entry(key).or_default().push(id.to_string());
                }
            }
        }
    }

    /// Removes `id` from every bucket (spec §4.5 DELETE).
    pub async fn remove_subscription(&self, id: &str) {
        let mut idx = self.inner.write().await;
        for bucket in idx.registry_prefixes.values_mut() {
            bucket.to_send.retain(|x| x != id);
            bucket.exclude.retain(|x| x != id);
        }
        for bucket in idx.message_ids.values_mut() {
            bucket.to_send.retain(|x| x != id);
            bucket.exclude.retain(|x| x != id);
        }
        for bucket in idx.resource_types.values_mut() {
            bucket.retain(|x| x != id);
        }
        for bucket in idx.origin_resources.values_mut() {
            bucket.retain(|x| x != id);
        }
    }

    /// Computes the subscriber set for one event (spec §4.4 "Subscriber set
    /// computation"). `origin` and `origin_type` are `None` unless the
    /// event carries an `OriginOfCondition` that resolved to a stored
    /// resource.
    pub async fn subscribers_for(
        &self,
        message_id: &str,
        origin: Option<&str>,
        origin_type: Option<&str>,
    ) -> Vec<String> {
        let prefix = message_id.split('.').next().unwrap_or(message_id);
        let idx = self.inner.read().await;

        let mut to_exclude: HashSet<String> = HashSet::new();
        if let Some(bucket) = idx.registry_prefixes.get(prefix) {
            to_exclude.extend(bucket.exclude.iter().cloned());
        }
        if let Some(bucket) = idx.message_ids.get(message_id) {
            to_exclude.extend(bucket.exclude.iter().cloned());
        }

        let mut to_forward: HashSet<String> = HashSet::new();
        if let Some(origin) = origin {
            if let Some(rtype) = origin_type {
                if let Some(ids) = idx.resource_types.get(rtype) {
                    to_forward.extend(ids.iter().cloned());
                }
            }
            if let Some(ids) = idx.origin_resources.get(origin) {
                to_forward.extend(ids.iter().cloned());
            }
            for (key, ids) in &idx.origin_resources {
                if let Some(base) = key.strip_suffix("/*") {
                    if origin.starts_with(base) {
                        to_forward.extend(ids.iter().cloned());
                    }
                }
            }
        }
        if let Some(bucket) = idx.registry_prefixes.get(prefix) {
            to_forward.extend(bucket.to_send.iter().cloned());
        }
        if let Some(bucket) = idx.message_ids.get(message_id) {
            to_forward.extend(bucket.to_send.iter().cloned());
        }

        to_forward.difference(&to_exclude).cloned().collect()
    }

    /// Repopulates every index bucket by scanning the stored
    /// `EventDestination` collection, run once at startup. A store whose
    /// subscriptions collection does not exist yet (first boot) is treated
    /// as zero subscriptions rather than an error.
    pub async fn rebuild_from_store(&self, store: &dyn ResourceStore, subscriptions_collection_path: &str) -> CoreResult<usize> {
        let Ok(collection) = store.read(subscriptions_collection_path).await else {
            return Ok(0);
        };
        let Some(members) = collection.get("Members").and_then(Value::as_array) else {
            return Ok(0);
        };

        let mut rebuilt = 0;
        for member in members {
            let Some(path) = member.get("@odata.id").and_then(Value::as_str) else {
                continue;
            };
            let subscription = store.read(path).await?;
            self.index_subscription(path, &subscription).await;
            rebuilt += 1;
        }
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn excludes_beat_includes_for_same_message_id() {
        let index = SubscriptionIndex::new();
        index
            .index_subscription("sub1", &json!({ "ExcludeMessageIds": ["TaskEvent.1.0.TaskCancelled"] }))
            .await;
        index
            .index_subscription("sub2", &json!({ "MessageIds": ["TaskEvent.1.0.TaskCancelled"] }))
            .await;

        let subs = index.subscribers_for("TaskEvent.1.0.TaskCancelled", None, None).await;
        assert_eq!(subs, vec!["sub2".to_string()]);
    }

    #[tokio::test]
    async fn subordinate_origin_matches_wildcard_prefix() {
        let index = SubscriptionIndex::new();
        index
            .index_subscription(
                "sub3",
                &json!({
                    "ResourceTypes": ["ComputerSystem"],
                    "OriginResources": [{ "@odata.id": "/redfish/v1/Systems/1" }],
                    "SubordinateResources": true
                }),
            )
            .await;

        let subs = index
            .subscribers_for("ResourceEvent.1.0.ResourceChanged", Some("/redfish/v1/Systems/1/Memory/1"), Some("Memory"))
            .await;
        assert_eq!(subs, vec!["sub3".to_string()]);
    }

    #[tokio::test]
    async fn rebuild_from_store_reindexes_every_stored_subscription() {
        use crate::store::MemoryResourceStore;

        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/EventService/Subscriptions/1",
                "@odata.type": "#EventDestination.v1.EventDestination",
                "Id": "1",
                "Destination": "http://sub1.example/events",
                "MessageIds": ["TaskEvent.1.0.TaskCancelled"]
            }))
            .await
            .unwrap();

        let index = SubscriptionIndex::new();
        let rebuilt = index
            .rebuild_from_store(&store, "/redfish/v1/EventService/Subscriptions")
            .await
            .unwrap();
        assert_eq!(rebuilt, 1);

        let subs = index.subscribers_for("TaskEvent.1.0.TaskCancelled", None, None).await;
        assert_eq!(subs, vec!["/redfish/v1/EventService/Subscriptions/1".to_string()]);
    }

    #[tokio::test]
    async fn rebuild_from_store_tolerates_a_missing_collection() {
        use crate::store::MemoryResourceStore;

        let store = MemoryResourceStore::new();
        let index = SubscriptionIndex::new();
        let rebuilt = index
            .rebuild_from_store(&store, "/redfish/v1/EventService/Subscriptions")
            .await
            .unwrap();
        assert_eq!(rebuilt, 0);
    }

    #[test]
    fn validate_rejects_overlapping_registry_prefixes() {
        let payload = json!({ "RegistryPrefixes": ["TaskEvent"], "ExcludeRegistryPrefixes": ["TaskEvent"] });
        assert!(matches!(SubscriptionIndex::validate(&payload), Err(CoreError::IllegalSubscription)));
    }

    #[test]
    fn validate_rejects_message_id_whose_prefix_is_excluded() {
        let payload = json!({ "MessageIds": ["TaskEvent.1.0.TaskCancelled"], "ExcludeRegistryPrefixes": ["TaskEvent"] });
        assert!(matches!(SubscriptionIndex::validate(&payload), Err(CoreError::IllegalSubscription)));
    }
}
