//! BFS Ingestor (spec §4.6/§4.7): crawls an agent's Redfish subtree breadth
//! first, renaming on collision, stamping ownership and rewriting nested
//! `@odata.id`s onto the canonical URI space.
//!
//! Grounded on `RedfishEventHandler.bfsInspection` / `fetchResourceAndTree`
//! / `createInspectedObject` / `renameUploadedObject` in
//! `examples/original_source/sunfish_plugins/events_handlers/redfish/redfish_event_handler.py`.
//! The Python queue is a plain list sorted on every pop; this keeps the same
//! externally-observable ordering (spec §8 S6) with a `Vec` and
//! `sort_unstable` each iteration.

use crate::agent_client::{AgentEndpoint, AgentTransport};
use crate::alias::AliasRegistry;
use crate::boundary;
use crate::error::CoreResult;
use crate::model::{is_collection_type, managing_agent_of, resource_type_of, walk_odata_ids, BoundaryComponent};
use crate::store::ResourceStore;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

pub struct IngestOutcome {
    /// Canonical URIs of every non-collection resource this crawl touched,
    /// in the order `createInspectedObject` finished with them. Feeds
    /// `AggregationSource.Links.ResourcesAccessed` (spec §4.6 last bullet).
    pub resources_accessed: Vec<String>,
}

/// Splits `id` into its ancestor path segments under `/redfish/v1/...` and
/// returns the first one not yet visited, if any (spec §4.6 "ancestor
/// pre-fetch gate", depths 4..len-1 under `/redfish/v1/`).
fn first_unvisited_ancestor(id: &str, visited: &HashSet<String>) -> Option<String> {
    let segments: Vec<&str> = id.trim_start_matches('/').split('/').collect();
    for end in 4..segments.len() {
        let candidate = format!("/{}", segments[..end].join("/"));
        if !visited.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) if idx > 0 => trimmed[..idx].to_string(),
        _ => String::new(),
    }
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

fn short_agent_tag(agent_id: &str) -> String {
    last_segment(agent_id).chars().take(4).collect()
}

fn renamed_path(original_path: &str, agent_id: &str, use_full_id: bool) -> String {
    let tag = if use_full_id { last_segment(agent_id).to_string() } else { short_agent_tag(agent_id) };
    format!("{}/Sunfish_{tag}_{}", parent_path(original_path), last_segment(original_path))
}

fn is_fabric_type(type_token: &str) -> bool {
    type_token == "Fabric"
}

async fn append_fabric_shared_with(store: &dyn ResourceStore, canonical_path: &str, agent_id: &str) -> CoreResult<()> {
    let existing = store.read(canonical_path).await?;
    let mut shared: Vec<String> = existing
        .get("Oem")
        .and_then(|o| o.get(crate::model::OEM_NAMESPACE))
        .and_then(|s| s.get("FabricSharedWith"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if !shared.contains(&agent_id.to_string()) {
        shared.push(agent_id.to_string());
    }
    store
        .patch(canonical_path, serde_json::json!({ "Oem": { crate::model::OEM_NAMESPACE: { "FabricSharedWith": shared } } }))
        .await?;
    Ok(())
}

/// Runs `createInspectedObject`'s identity/rename/merge decision for one
/// fetched object, stamps it and persists it under its canonical URI.
/// Returns `None` for collections (never stored individually); otherwise
/// the canonical URI the object ended up at.
async fn ingest_object(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    endpoint: &AgentEndpoint,
    mut obj: Value,
) -> CoreResult<Option<String>> {
    let agent_path = obj
        .get("@odata.id")
        .and_then(Value::as_str)
        .ok_or_else(|| crate::error::CoreError::PropertyNotFound("@odata.id".to_string()))?
        .to_string();
    let type_token = resource_type_of(&obj).unwrap_or_default();

    if is_collection_type(&type_token) {
        return Ok(None);
    }

    let is_boundary_port = boundary::is_boundary_port(&obj);

    // If this agent URI was already aliased by an earlier ingest, reuse that
    // canonical id rather than re-deriving one.
    if let Some(canonical_path) = alias.canonical_for(&endpoint.agent_id, &agent_path).await {
        if store.exists(&canonical_path).await {
            let existing = store.read(&canonical_path).await?;
            if managing_agent_of(&existing).as_deref() == Some(endpoint.agent_id.as_str()) {
                // duplicate posting of an already-known resource: no-op.
                return Ok(Some(canonical_path));
            }
        }
        return persist_canonical(store, alias, endpoint, obj, &agent_path, &canonical_path, is_boundary_port).await;
    }

    if !store.exists(&agent_path).await {
        alias.record_alias(&endpoint.agent_id, &agent_path, &agent_path).await;
        return persist_canonical(store, alias, endpoint, obj, &agent_path, &agent_path, is_boundary_port).await;
    }

    let existing = store.read(&agent_path).await?;
    if managing_agent_of(&existing).as_deref() == Some(endpoint.agent_id.as_str()) {
        warn!(path = %agent_path, "duplicate posting of a resource already owned by this agent, ignored");
        alias.record_alias(&endpoint.agent_id, &agent_path, &agent_path).await;
        return Ok(Some(agent_path));
    }

    let existing_uuid = existing.get("UUID").and_then(Value::as_str);
    let incoming_uuid = obj.get("UUID").and_then(Value::as_str);
    if is_fabric_type(&type_token) && existing_uuid.is_some() && existing_uuid == incoming_uuid {
        info!(path = %agent_path, agent = %endpoint.agent_id, "merging shared fabric resource by UUID");
        append_fabric_shared_with(store, &agent_path, &endpoint.agent_id).await?;
        alias.record_alias(&endpoint.agent_id, &agent_path, &agent_path).await;
        return Ok(Some(agent_path));
    }

    let mut canonical_path = renamed_path(&agent_path, &endpoint.agent_id, false);
    if store.exists(&canonical_path).await {
        canonical_path = renamed_path(&agent_path, &endpoint.agent_id, true);
    }

    if let Value::Object(map) = &mut obj {
        if map.get("Id").and_then(Value::as_str) == Some(last_segment(&agent_path)) {
            map.insert("Id".to_string(), Value::String(last_segment(&canonical_path).to_string()));
        }
    }

    alias.record_alias(&endpoint.agent_id, &agent_path, &canonical_path).await;
    persist_canonical(store, alias, endpoint, obj, &agent_path, &canonical_path, is_boundary_port).await
}

async fn persist_canonical(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    endpoint: &AgentEndpoint,
    mut obj: Value,
    agent_path: &str,
    canonical_path: &str,
    is_boundary_port: bool,
) -> CoreResult<Option<String>> {
    if let Value::Object(map) = &mut obj {
        map.insert("@odata.id".to_string(), Value::String(canonical_path.to_string()));
        crate::model::stamp_ownership(map, &endpoint.agent_id, BoundaryComponent::Owned);
    }

    if is_boundary_port {
        if let Some(port) = boundary::extract_boundary_port(&obj) {
            alias.register_boundary_port(&endpoint.agent_id, canonical_path, port).await;
        }
    }

    if store.exists(canonical_path).await {
        let current = store.read(canonical_path).await?;
        if current != obj {
            warn!(path = %canonical_path, "resource state changed since last ingestion, merging");
            store.patch(canonical_path, obj).await?;
        }
    } else {
        store.write(obj).await?;
    }

    let _ = agent_path;
    Ok(Some(canonical_path.to_string()))
}

/// Crawls the agent's tree starting at `root_id` (the agent-relative
/// `@odata.id` the triggering event named), following every nested
/// `@odata.id` it finds, parent-before-child (spec §4.6). Unreachable
/// resources are skipped rather than aborting the whole crawl.
pub async fn ingest(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    transport: &dyn AgentTransport,
    endpoint: &AgentEndpoint,
    root_id: &str,
) -> CoreResult<IngestOutcome> {
    let mut queue: Vec<String> = vec![root_id.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root_id.to_string());
    let mut resources_accessed = Vec::new();

    while !queue.is_empty() {
        queue.sort_unstable();
        let id = queue.remove(0);

        if let Some(ancestor) = first_unvisited_ancestor(&id, &visited) {
            visited.insert(ancestor.clone());
            queue.push(ancestor);
            queue.push(id);
            continue;
        }

        let Ok(obj) = transport.get(endpoint, &id).await else {
            info!(path = %id, "resource not available from agent, skipping");
            continue;
        };

        if let Some(canonical_path) = ingest_object(store, alias, endpoint, obj.clone()).await? {
            if !resources_accessed.contains(&canonical_path) {
                resources_accessed.push(canonical_path);
            }
        }

        // Append-then-continue: every nested id found is queued, scanning
        // never stops early at the first match (resolves the BFS visitor
        // open question in spec §4.6/§9).
        let mut to_enqueue = Vec::new();
        walk_odata_ids(&obj, &mut |nested_id| {
            if !visited.contains(nested_id) {
                to_enqueue.push(nested_id.to_string());
            }
        });
        for nested_id in to_enqueue {
            if visited.insert(nested_id.clone()) {
                queue.push(nested_id);
            }
        }
    }

    crate::alias_link::update_alias_links(store, alias, &endpoint.agent_id, &resources_accessed).await?;
    boundary::resolve_boundary_ports(store, alias).await?;

    Ok(IngestOutcome { resources_accessed })
}
