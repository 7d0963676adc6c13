//! Ownership Router (spec §4.2): decides whether a request against a path
//! stays local or must be forwarded to the agent that owns the resource.
//!
//! Grounded on the ancestor walk implicit in
//! `examples/original_source/sunfish/lib/core.py`'s `get_manager`/ownership
//! checks -- a resource inherits its managing agent from the nearest
//! ancestor stamped with `Oem.Sunfish_RM.ManagingAgent` if it has none of
//! its own.

use crate::agent_client::AgentEndpoint;
use crate::error::CoreResult;
use crate::model::{managing_agent_of, Verb};
use crate::store::ResourceStore;

/// Resolution of where a request for `path` should be executed.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote(String),
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

/// Top-level children of `/redfish/v1` (AggregationService, EventService,
/// the resource collections) are never agent-managed through the router --
/// they only change through the Event Handler Table (spec §4.2 Non-goals).
fn is_top_level(path: &str) -> bool {
    parent_path(path).as_deref() == Some("/redfish/v1")
}

/// Walks from `path` up through its ancestors looking for the nearest
/// `ManagingAgent` stamp. For `Verb::Create`, the walk starts one level
/// higher (the parent-of-parent of the new resource, i.e. the ancestor of
/// the collection it would land in) since the resource itself does not yet
/// exist (spec §4.2 "CREATE uses parent-of-parent").
pub async fn resolve(store: &dyn ResourceStore, path: &str, verb: Verb) -> CoreResult<Route> {
    if is_top_level(path) || path == "/redfish/v1" {
        return Ok(Route::Local);
    }

    let mut cursor = if verb == Verb::Create {
        parent_path(path).and_then(|p| parent_path(&p))
    } else {
        Some(path.to_string())
    };

    while let Some(candidate) = cursor {
        if candidate == "/redfish/v1" {
            break;
        }
        if let Ok(obj) = store.read(&candidate).await {
            if let Some(agent_id) = managing_agent_of(&obj) {
                return Ok(Route::Remote(agent_id));
            }
        }
        cursor = parent_path(&candidate);
    }

    Ok(Route::Local)
}

/// Looks up the `AgentEndpoint` for a `ManagingAgent` reference (an
/// `AggregationSource` path), reading its `HostName`.
pub async fn endpoint_for(store: &dyn ResourceStore, agent_id: &str) -> CoreResult<AgentEndpoint> {
    let source = store.read(agent_id).await?;
    let host_name = source
        .get("HostName")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| crate::error::CoreError::PropertyNotFound("HostName".to_string()))?
        .to_string();
    Ok(AgentEndpoint {
        agent_id: agent_id.to_string(),
        host_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryResourceStore;
    use serde_json::json;

    #[tokio::test]
    async fn resource_inherits_ownership_from_nearest_stamped_ancestor() {
        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Fabrics/CXL",
                "@odata.type": "#Fabric.v1.Fabric",
                "Oem": { "Sunfish_RM": { "ManagingAgent": { "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1" } } }
            }))
            .await
            .unwrap();
        store
            .write(json!({ "@odata.id": "/redfish/v1/Fabrics/CXL/Switches", "@odata.type": "#SwitchCollection.SwitchCollection" }))
            .await
            .unwrap();
        store
            .write(json!({ "@odata.id": "/redfish/v1/Fabrics/CXL/Switches/S1", "@odata.type": "#Switch.v1.Switch" }))
            .await
            .unwrap();

        let route = resolve(&store, "/redfish/v1/Fabrics/CXL/Switches/S1", Verb::Get).await.unwrap();
        assert_eq!(route, Route::Remote("/redfish/v1/AggregationService/AggregationSources/a1".to_string()));
    }

    #[tokio::test]
    async fn create_walks_from_the_parent_of_the_target_collection() {
        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(json!({
                "@odata.id": "/redfish/v1/Fabrics/CXL",
                "@odata.type": "#Fabric.v1.Fabric",
                "Oem": { "Sunfish_RM": { "ManagingAgent": { "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1" } } }
            }))
            .await
            .unwrap();

        let route = resolve(&store, "/redfish/v1/Fabrics/CXL/Switches/New", Verb::Create).await.unwrap();
        assert_eq!(route, Route::Remote("/redfish/v1/AggregationService/AggregationSources/a1".to_string()));
    }

    #[tokio::test]
    async fn top_level_collections_always_stay_local() {
        let store = MemoryResourceStore::new();
        store.seed(json!({ "@odata.id": "/redfish/v1" })).await;
        let route = resolve(&store, "/redfish/v1/Fabrics", Verb::Get).await.unwrap();
        assert_eq!(route, Route::Local);
    }
}
