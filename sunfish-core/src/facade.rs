//! Core Façade (spec §3 Component J): the single entry point `redfish-axum`
//! (or any other transport) drives. Ties together the Ownership Router,
//! Agent Client, Object Handler Table, Event Handler Table and Event
//! Forwarder around the Resource Store.

use crate::agent_client::AgentTransport;
use crate::alias::AliasRegistry;
use crate::error::{CoreError, CoreResult};
use crate::event_handlers::{self, EventRecord};
use crate::forwarder;
use crate::model::{self, is_collection_type, resource_type_of, stamp_ownership, BoundaryComponent, Verb};
use crate::object_handlers;
use crate::router::{self, Route};
use crate::store::ResourceStore;
use crate::subscriptions::SubscriptionIndex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct CoreFacade {
    store: Arc<dyn ResourceStore>,
    alias: Arc<AliasRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    transport: Arc<dyn AgentTransport>,
    /// Always stored without a trailing slash, e.g. `/redfish/v1`.
    redfish_root: String,
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

impl CoreFacade {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        alias: Arc<AliasRegistry>,
        subscriptions: Arc<SubscriptionIndex>,
        transport: Arc<dyn AgentTransport>,
        redfish_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            alias,
            subscriptions,
            transport,
            redfish_root: redfish_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn redfish_root(&self) -> &str {
        &self.redfish_root
    }

    /// Every path this façade is asked to operate on must live under the
    /// configured `redfish_root` (spec §6: "Resources are addressed at
    /// `/<path…>` where `path` starts with the configured `redfish_root`").
    fn validate_path(&self, path: &str) -> CoreResult<()> {
        if path == self.redfish_root || path.starts_with(&format!("{}/", self.redfish_root)) {
            Ok(())
        } else {
            Err(CoreError::InvalidPath(path.to_string()))
        }
    }

    pub async fn get(&self, path: &str) -> CoreResult<Value> {
        self.validate_path(path)?;
        self.store.read(path).await
    }

    /// Rewrites every nested `@odata.id` a payload bound for `agent_id`
    /// still carries in canonical space back into that agent's own space.
    /// A nested id this agent has no alias for is left as-is -- it refers to
    /// a resource the agent never served and the agent is expected to
    /// resolve it by other means.
    async fn translate_outbound(&self, mut value: Value, agent_id: &str) -> Value {
        let mut candidates = Vec::new();
        model::walk_odata_ids(&value, &mut |id| candidates.push(id.to_string()));
        let mut resolved = HashMap::new();
        for id in &candidates {
            if let Some(agent_uri) = self.alias.agent_uri_for(agent_id, id).await {
                if &agent_uri != id {
                    resolved.insert(id.clone(), agent_uri);
                }
            }
        }
        model::rewrite_nested_odata_ids(&mut value, &mut |id| resolved.get(id).cloned());
        value
    }

    /// Inverse of `translate_outbound`: rewrites nested ids an agent
    /// returned in its own space back to canonical, recording a fresh alias
    /// for any id not yet known.
    async fn translate_inbound(&self, mut value: Value, agent_id: &str) -> Value {
        let mut candidates = Vec::new();
        model::walk_odata_ids(&value, &mut |id| candidates.push(id.to_string()));
        let mut resolved = HashMap::new();
        for id in &candidates {
            let canonical = match self.alias.canonical_for(agent_id, id).await {
                Some(canonical) => canonical,
                None => {
                    self.alias.record_alias(agent_id, id, id).await;
                    id.clone()
                }
            };
            if &canonical != id {
                resolved.insert(id.clone(), canonical);
            }
        }
        model::rewrite_nested_odata_ids(&mut value, &mut |id| resolved.get(id).cloned());
        value
    }

    async fn endpoint_for(&self, agent_id: &str) -> CoreResult<crate::agent_client::AgentEndpoint> {
        router::endpoint_for(self.store.as_ref(), agent_id).await
    }

    fn reject_collections(value: &Value) -> CoreResult<String> {
        let type_token = resource_type_of(value).unwrap_or_default();
        if is_collection_type(&type_token) {
            return Err(CoreError::CollectionNotSupported);
        }
        Ok(type_token)
    }

    /// Assigns `Id`/`@odata.id` when both are absent from the payload (spec
    /// §4.1 create id-assignment), otherwise fills in whichever of the two
    /// is missing from the other.
    fn assign_create_identity(parent_collection_path: &str, payload: &mut Map<String, Value>) -> String {
        let has_id = payload.get("Id").and_then(Value::as_str).is_some();
        let has_odata_id = payload.get("@odata.id").and_then(Value::as_str).is_some();

        let full_path = if !has_id && !has_odata_id {
            let id = Uuid::new_v4().to_string();
            let path = format!("{parent_collection_path}/{id}");
            payload.insert("Id".to_string(), Value::String(id));
            payload.insert("@odata.id".to_string(), Value::String(path.clone()));
            path
        } else if has_odata_id {
            let path = payload["@odata.id"].as_str().unwrap().to_string();
            payload
                .entry("Id")
                .or_insert_with(|| Value::String(last_segment(&path).to_string()));
            path
        } else {
            let id = payload["Id"].as_str().unwrap().to_string();
            let path = format!("{parent_collection_path}/{id}");
            payload.insert("@odata.id".to_string(), Value::String(path.clone()));
            path
        };
        full_path
    }

    pub async fn create(&self, parent_collection_path: &str, mut payload: Map<String, Value>) -> CoreResult<Value> {
        self.validate_path(parent_collection_path)?;
        let type_token = Self::reject_collections(&Value::Object(payload.clone()))?;
        let full_path = Self::assign_create_identity(parent_collection_path, &mut payload);

        let route = router::resolve(self.store.as_ref(), &full_path, Verb::Create).await?;
        let committed = match route {
            Route::Local => self.store.write(Value::Object(payload)).await?,
            Route::Remote(agent_id) => {
                let endpoint = self.endpoint_for(&agent_id).await?;
                let outbound = self.translate_outbound(Value::Object(payload), &agent_id).await;
                let agent_collection_path = self
                    .alias
                    .agent_uri_for(&agent_id, parent_collection_path)
                    .await
                    .unwrap_or_else(|| parent_collection_path.to_string());

                let response = self.transport.create(&endpoint, &agent_collection_path, &outbound).await?;
                let mut inbound = self.translate_inbound(response, &agent_id).await;

                if let Value::Object(map) = &mut inbound {
                    map.insert("@odata.id".to_string(), Value::String(full_path.clone()));
                    map.entry("Id").or_insert_with(|| Value::String(last_segment(&full_path).to_string()));
                    stamp_ownership(map, &agent_id, BoundaryComponent::Owned);
                }
                self.alias.record_alias(&agent_id, &full_path, &full_path).await;
                self.store.write(inbound).await?
            }
        };

        object_handlers::dispatch(&self.subscriptions, &type_token, &full_path, Verb::Create, Some(&committed)).await?;
        Ok(committed)
    }

    async fn write_existing(&self, path: &str, payload: Value, verb: Verb) -> CoreResult<Value> {
        self.validate_path(path)?;
        let existing = self.store.read(path).await?;
        let type_token = Self::reject_collections(&existing)?;

        let route = router::resolve(self.store.as_ref(), path, verb).await?;
        let committed = match route {
            Route::Local => self.commit_local(path, payload, verb).await?,
            Route::Remote(agent_id) => {
                let endpoint = self.endpoint_for(&agent_id).await?;
                let outbound = self.translate_outbound(payload, &agent_id).await;
                let agent_path = self.alias.agent_uri_for(&agent_id, path).await.unwrap_or_else(|| path.to_string());

                let response = match verb {
                    Verb::Replace => self.transport.replace(&endpoint, &agent_path, &outbound).await?,
                    Verb::Patch => self.transport.patch(&endpoint, &agent_path, &outbound).await?,
                    _ => unreachable!("write_existing only handles Replace/Patch"),
                };
                let mut inbound = self.translate_inbound(response, &agent_id).await;
                if let Value::Object(map) = &mut inbound {
                    map.insert("@odata.id".to_string(), Value::String(path.to_string()));
                }
                self.commit_local(path, inbound, verb).await?
            }
        };

        object_handlers::dispatch(&self.subscriptions, &type_token, path, verb, Some(&committed)).await?;
        Ok(committed)
    }

    async fn commit_local(&self, path: &str, payload: Value, verb: Verb) -> CoreResult<Value> {
        match verb {
            Verb::Replace => self.store.replace(payload).await,
            Verb::Patch => self.store.patch(path, payload).await,
            _ => unreachable!("commit_local only handles Replace/Patch"),
        }
    }

    pub async fn replace(&self, path: &str, payload: Value) -> CoreResult<Value> {
        self.write_existing(path, payload, Verb::Replace).await
    }

    pub async fn patch(&self, path: &str, payload: Value) -> CoreResult<Value> {
        self.write_existing(path, payload, Verb::Patch).await
    }

    pub async fn delete(&self, path: &str) -> CoreResult<()> {
        self.validate_path(path)?;
        let existing = self.store.read(path).await?;
        let type_token = Self::reject_collections(&existing)?;

        let route = router::resolve(self.store.as_ref(), path, Verb::Delete).await?;
        if let Route::Remote(agent_id) = route {
            let endpoint = self.endpoint_for(&agent_id).await?;
            let agent_path = self.alias.agent_uri_for(&agent_id, path).await.unwrap_or_else(|| path.to_string());
            self.transport.delete(&endpoint, &agent_path).await?;
        }

        self.store.remove(path).await?;
        object_handlers::dispatch(&self.subscriptions, &type_token, path, Verb::Delete, None).await?;
        Ok(())
    }

    /// Runs every event in the envelope through the built-in Event Handler
    /// Table, then through the Event Forwarder, returning the union of
    /// subscriber ids notified across all of them.
    pub async fn handle_event(&self, envelope: &Value) -> CoreResult<Vec<String>> {
        let context = envelope.get("Context").and_then(Value::as_str);
        let events = envelope.get("Events").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut notified = Vec::new();
        for event in &events {
            let Some(message_id) = event.get("MessageId").and_then(Value::as_str) else {
                continue;
            };
            let message_args: Vec<Value> = event
                .get("MessageArgs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let origin_of_condition = event.get("OriginOfCondition").and_then(|o| o.get("@odata.id")).and_then(Value::as_str);

            let record = EventRecord {
                message_id,
                message_args: &message_args,
                origin_of_condition,
            };
            event_handlers::dispatch(self.store.as_ref(), &self.alias, self.transport.as_ref(), &self.redfish_root, context, &record).await?;

            let ids = forwarder::forward_event(
                self.store.as_ref(),
                &self.subscriptions,
                self.transport.as_ref(),
                message_id,
                origin_of_condition,
                envelope,
            )
            .await?;
            for id in ids {
                if !notified.contains(&id) {
                    notified.push(id);
                }
            }
        }
        Ok(notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_client::fake::FakeAgentTransport;
    use crate::store::MemoryResourceStore;
    use serde_json::json;

    fn facade_with(store: Arc<MemoryResourceStore>, transport: Arc<FakeAgentTransport>) -> CoreFacade {
        CoreFacade::new(store, Arc::new(AliasRegistry::new()), Arc::new(SubscriptionIndex::new()), transport, "/redfish/v1/")
    }

    #[tokio::test]
    async fn creates_and_deletes_a_local_resource() {
        let store = Arc::new(MemoryResourceStore::new());
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        let facade = facade_with(store.clone(), Arc::new(FakeAgentTransport::new()));

        let payload = json!({ "@odata.type": "#ComputerSystem.v1_9_0.ComputerSystem", "Name": "New System" })
            .as_object()
            .unwrap()
            .clone();
        let created = facade.create("/redfish/v1/Systems", payload).await.unwrap();
        let path = created["@odata.id"].as_str().unwrap().to_string();
        assert!(store.exists(&path).await);

        facade.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await);
    }

    #[tokio::test]
    async fn replace_overwrites_the_whole_local_resource() {
        let store = Arc::new(MemoryResourceStore::new());
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Systems/1",
                "@odata.type": "#ComputerSystem.v1_9_0.ComputerSystem",
                "Id": "1",
                "Name": "Old Name",
                "PowerState": "On"
            }))
            .await
            .unwrap();
        let facade = facade_with(store.clone(), Arc::new(FakeAgentTransport::new()));

        let replacement = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "@odata.type": "#ComputerSystem.v1_9_0.ComputerSystem",
            "Id": "1",
            "Name": "New Name"
        });
        let replaced = facade.replace("/redfish/v1/Systems/1", replacement).await.unwrap();

        assert_eq!(replaced["Name"], "New Name");
        assert!(replaced.get("PowerState").is_none(), "replace must overwrite the whole object, not merge");
    }

    #[tokio::test]
    async fn rejects_a_path_outside_the_configured_redfish_root() {
        let store = Arc::new(MemoryResourceStore::new());
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        let facade = facade_with(store, Arc::new(FakeAgentTransport::new()));

        let err = facade.get("/other/v1/Systems/1").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn rejects_writes_against_a_collection_path() {
        let store = Arc::new(MemoryResourceStore::new());
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({ "@odata.id": "/redfish/v1/Systems", "@odata.type": "#ComputerSystemCollection.ComputerSystemCollection" }))
            .await
            .unwrap();
        let facade = facade_with(store, Arc::new(FakeAgentTransport::new()));

        let err = facade.delete("/redfish/v1/Systems").await.unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotSupported));
    }

    #[tokio::test]
    async fn forwards_create_to_the_owning_agent_and_stamps_ownership() {
        let store = Arc::new(MemoryResourceStore::new());
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Fabrics/CXL",
                "@odata.type": "#Fabric.v1.Fabric",
                "Id": "CXL",
                "Oem": { "Sunfish_RM": { "ManagingAgent": { "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1" } } }
            }))
            .await
            .unwrap();
        store
            .write(json!({
                "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1",
                "@odata.type": "#AggregationSource.v1.AggregationSource",
                "Id": "a1",
                "HostName": "http://agent.example"
            }))
            .await
            .unwrap();

        let transport = Arc::new(FakeAgentTransport::new());
        let facade = facade_with(store.clone(), transport.clone());

        let payload = json!({ "@odata.type": "#Switch.v1.Switch", "Name": "New Switch" }).as_object().unwrap().clone();
        let created = facade.create("/redfish/v1/Fabrics/CXL/Switches", payload).await.unwrap();

        assert_eq!(
            created["Oem"]["Sunfish_RM"]["ManagingAgent"]["@odata.id"],
            "/redfish/v1/AggregationService/AggregationSources/a1"
        );
        let posted = transport.resources.lock().await;
        assert!(!posted.is_empty());
    }
}
