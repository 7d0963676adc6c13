//! Event Handler Table: the built-in message-id handlers that run before an
//! event reaches the Event Forwarder's subscriber fan-out.
//!
//! Grounded on the same dispatch-by-suffix shape as `object_handlers`, keyed
//! here on the trailing segment of `MessageId` rather than `@odata.type`.

use crate::agent_client::AgentTransport;
use crate::alias::AliasRegistry;
use crate::bfs;
use crate::error::{CoreError, CoreResult};
use crate::router;
use crate::store::ResourceStore;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct EventRecord<'a> {
    pub message_id: &'a str,
    pub message_args: &'a [Value],
    pub origin_of_condition: Option<&'a str>,
}

/// The part of a `MessageId` that selects a handler, e.g.
/// `"Sunfish.1.0.AggregationSourceDiscovered"` -> `"AggregationSourceDiscovered"`.
pub fn message_name(message_id: &str) -> &str {
    message_id.rsplit('.').next().unwrap_or(message_id)
}

/// Runs the built-in handler for one event record, if any is registered.
/// Unrecognized message ids are logged and otherwise ignored -- only the
/// Event Forwarder's subscriber fan-out runs for them.
pub async fn dispatch(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    transport: &dyn AgentTransport,
    redfish_root: &str,
    context: Option<&str>,
    record: &EventRecord<'_>,
) -> CoreResult<()> {
    // An empty string is as much "no Context" as `Context` being absent
    // altogether -- both mean the agent never identified itself.
    let context = context.filter(|c| !c.is_empty());
    match message_name(record.message_id) {
        "AggregationSourceDiscovered" => handle_aggregation_source_discovered(store, alias, transport, context).await,
        "ResourceCreated" => handle_resource_created(store, alias, transport, context, record).await,
        "ClearResources" => handle_clear_resources(store, alias, context).await,
        "TriggerEvent" => handle_trigger_event(store, transport, redfish_root, record.message_args).await,
        other => {
            debug!(message_id = other, "no built-in handler registered for this message id");
            Ok(())
        }
    }
}

async fn merge_resources_accessed(store: &dyn ResourceStore, aggregation_source_path: &str, newly_accessed: &[String]) -> CoreResult<()> {
    let source = store.read(aggregation_source_path).await?;
    let mut accessed: Vec<String> = source
        .get("Links")
        .and_then(|l| l.get("ResourcesAccessed"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.get("@odata.id")).filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    for path in newly_accessed {
        if !accessed.contains(path) {
            accessed.push(path.clone());
        }
    }
    let refs: Vec<Value> = accessed.into_iter().map(|p| json!({ "@odata.id": p })).collect();
    store
        .patch(aggregation_source_path, json!({ "Links": { "ResourcesAccessed": refs } }))
        .await?;
    Ok(())
}

/// Runs a full discovery crawl of a newly-connected agent's tree, then tells
/// the agent to tag every future event it sends with its own
/// `AggregationSource` reference as `Context`.
async fn handle_aggregation_source_discovered(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    transport: &dyn AgentTransport,
    context: Option<&str>,
) -> CoreResult<()> {
    let Some(agent_id) = context else {
        return Err(CoreError::PropertyNotFound("Context".to_string()));
    };
    let endpoint = router::endpoint_for(store, agent_id).await?;

    let outcome = bfs::ingest(store, alias, transport, &endpoint, "/redfish/v1").await?;
    merge_resources_accessed(store, agent_id, &outcome.resources_accessed).await?;

    transport
        .patch(&endpoint, "/redfish/v1/EventService/Subscriptions/SunfishServer", &json!({ "Context": agent_id }))
        .await?;

    info!(agent = agent_id, resources = outcome.resources_accessed.len(), "agent discovery complete");
    Ok(())
}

/// Incremental counterpart to `AggregationSourceDiscovered`: crawls from the
/// single newly-appeared resource the event names rather than the whole
/// tree.
async fn handle_resource_created(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    transport: &dyn AgentTransport,
    context: Option<&str>,
    record: &EventRecord<'_>,
) -> CoreResult<()> {
    let Some(agent_id) = context else {
        return Err(CoreError::PropertyNotFound("Context".to_string()));
    };
    let root_id = record
        .origin_of_condition
        .or_else(|| record.message_args.first().and_then(Value::as_str))
        .ok_or_else(|| CoreError::PropertyNotFound("OriginOfCondition".to_string()))?;

    let endpoint = router::endpoint_for(store, agent_id).await?;
    let outcome = bfs::ingest(store, alias, transport, &endpoint, root_id).await?;
    merge_resources_accessed(store, agent_id, &outcome.resources_accessed).await?;
    Ok(())
}

/// Removes every resource an agent contributed and drops its alias state
/// (spec'd as `ClearResources` -- the agent is being deregistered or reset).
async fn handle_clear_resources(store: &dyn ResourceStore, alias: &AliasRegistry, context: Option<&str>) -> CoreResult<()> {
    let Some(agent_id) = context else {
        return Err(CoreError::PropertyNotFound("Context".to_string()));
    };
    let source = store.read(agent_id).await?;
    let accessed: Vec<String> = source
        .get("Links")
        .and_then(|l| l.get("ResourcesAccessed"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.get("@odata.id")).filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    for path in &accessed {
        match store.remove(path).await {
            Ok(()) | Err(CoreError::ResourceNotFound(_)) => {}
            Err(other) => return Err(other),
        }
    }

    store.patch(agent_id, json!({ "Links": { "ResourcesAccessed": [] } })).await?;
    alias.clear_agent(agent_id).await;
    Ok(())
}

/// Relays an event straight to one destination, bypassing the subscriber
/// index. `Context == "None"` means "use whatever Context the subscriber
/// already registered with this destination"; any other non-empty value is
/// passed through verbatim; an empty value is sent as `null`.
async fn handle_trigger_event(store: &dyn ResourceStore, transport: &dyn AgentTransport, redfish_root: &str, message_args: &[Value]) -> CoreResult<()> {
    let destination = message_args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::PropertyNotFound("MessageArgs[0] (Destination)".to_string()))?;
    let inner_message_id = message_args.get(1).and_then(Value::as_str).unwrap_or_default();
    let raw_context = message_args.get(2).and_then(Value::as_str);

    let resolved_context = match raw_context {
        None | Some("None") => find_subscriber_by_destination(store, redfish_root, destination)
            .await?
            .and_then(|sub| sub.get("Context").and_then(Value::as_str).map(str::to_string)),
        Some("") => None,
        Some(other) => Some(other.to_string()),
    };

    let envelope = json!({
        "@odata.type": "#Event.v1_3_0.Event",
        "Context": resolved_context,
        "Events": [{ "MessageId": inner_message_id }],
    });
    transport.post_event(destination, &envelope).await
}

async fn find_subscriber_by_destination(store: &dyn ResourceStore, redfish_root: &str, destination: &str) -> CoreResult<Option<Value>> {
    let root = redfish_root.trim_end_matches('/');
    let collection_path = format!("{root}/EventService/Subscriptions");
    let Ok(collection) = store.read(&collection_path).await else {
        return Ok(None);
    };
    let Some(members) = collection.get("Members").and_then(Value::as_array) else {
        return Ok(None);
    };
    for member in members {
        let Some(member_path) = member.get("@odata.id").and_then(Value::as_str) else {
            continue;
        };
        if let Ok(subscriber) = store.read(member_path).await {
            if subscriber.get("Destination").and_then(Value::as_str) == Some(destination) {
                return Ok(Some(subscriber));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_client::fake::FakeAgentTransport;
    use crate::store::MemoryResourceStore;
    use serde_json::json;

    async fn seeded_store_with_source() -> MemoryResourceStore {
        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1",
                "@odata.type": "#AggregationSource.v1.AggregationSource",
                "Id": "a1",
                "HostName": "http://agent.example",
                "Links": { "ResourcesAccessed": [] }
            }))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn resource_created_with_empty_context_raises_property_not_found() {
        let store = seeded_store_with_source().await;
        let alias = AliasRegistry::new();
        let transport = FakeAgentTransport::new();

        let record = EventRecord {
            message_id: "Sunfish.1.0.ResourceCreated",
            message_args: &[],
            origin_of_condition: Some("/redfish/v1/Fabrics/CXL"),
        };
        let err = dispatch(&store, &alias, &transport, "/redfish/v1/", Some(""), &record).await.unwrap_err();
        assert!(matches!(err, CoreError::PropertyNotFound(_)));
    }

    #[tokio::test]
    async fn aggregation_source_discovered_ingests_whole_tree_and_patches_context() {
        let store = seeded_store_with_source().await;
        let alias = AliasRegistry::new();
        let transport = FakeAgentTransport::new();
        transport
            .seed(
                "/redfish/v1",
                json!({ "@odata.id": "/redfish/v1", "@odata.type": "#ServiceRoot.v1.ServiceRoot", "Id": "RootService" }),
            )
            .await;

        let record = EventRecord {
            message_id: "Sunfish.1.0.AggregationSourceDiscovered",
            message_args: &[],
            origin_of_condition: None,
        };
        dispatch(&store, &alias, &transport, "/redfish/v1/", Some("/redfish/v1/AggregationService/AggregationSources/a1"), &record)
            .await
            .unwrap();

        let source = store.read("/redfish/v1/AggregationService/AggregationSources/a1").await.unwrap();
        let accessed = source["Links"]["ResourcesAccessed"].as_array().unwrap();
        assert!(!accessed.is_empty());

        let patched = transport.resources.lock().await;
        assert_eq!(
            patched.get("/redfish/v1/EventService/Subscriptions/SunfishServer").unwrap()["Context"],
            "/redfish/v1/AggregationService/AggregationSources/a1"
        );
    }

    #[tokio::test]
    async fn clear_resources_removes_everything_and_drops_aliases() {
        let store = seeded_store_with_source().await;
        store
            .write(json!({ "@odata.id": "/redfish/v1/Fabrics/CXL", "@odata.type": "#Fabric.v1.Fabric", "Id": "CXL" }))
            .await
            .unwrap();
        store
            .patch(
                "/redfish/v1/AggregationService/AggregationSources/a1",
                json!({ "Links": { "ResourcesAccessed": [{ "@odata.id": "/redfish/v1/Fabrics/CXL" }] } }),
            )
            .await
            .unwrap();

        let alias = AliasRegistry::new();
        alias
            .record_alias("/redfish/v1/AggregationService/AggregationSources/a1", "/redfish/v1/Fabrics/CXL", "/redfish/v1/Fabrics/CXL")
            .await;

        let transport = FakeAgentTransport::new();
        let record = EventRecord { message_id: "Sunfish.1.0.ClearResources", message_args: &[], origin_of_condition: None };
        dispatch(&store, &alias, &transport, "/redfish/v1/", Some("/redfish/v1/AggregationService/AggregationSources/a1"), &record)
            .await
            .unwrap();

        assert!(!store.exists("/redfish/v1/Fabrics/CXL").await);
        let source = store.read("/redfish/v1/AggregationService/AggregationSources/a1").await.unwrap();
        assert_eq!(source["Links"]["ResourcesAccessed"].as_array().unwrap().len(), 0);
        assert!(alias
            .canonical_for("/redfish/v1/AggregationService/AggregationSources/a1", "/redfish/v1/Fabrics/CXL")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn trigger_event_with_none_context_looks_up_subscriber_destination() {
        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({ "@odata.id": "/redfish/v1/EventService/Subscriptions", "@odata.type": "#EventDestinationCollection.EventDestinationCollection" }))
            .await
            .unwrap();
        store
            .write(json!({
                "@odata.id": "/redfish/v1/EventService/Subscriptions/1",
                "@odata.type": "#EventDestination.v1.EventDestination",
                "Id": "1",
                "Destination": "http://sub.example/events",
                "Context": "subscriber-context"
            }))
            .await
            .unwrap();

        let transport = FakeAgentTransport::new();
        let args = vec![json!("http://sub.example/events"), json!("ResourceEvent.1.0.ResourceChanged"), json!("None")];
        let record = EventRecord { message_id: "Sunfish.1.0.TriggerEvent", message_args: &args, origin_of_condition: None };
        dispatch(&store, &AliasRegistry::new(), &transport, "/redfish/v1/", None, &record).await.unwrap();

        let posted = transport.posted_events.lock().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "http://sub.example/events");
        assert_eq!(posted[0].1["Context"], "subscriber-context");
    }
}
