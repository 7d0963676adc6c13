//! Cross-agent URI aliasing and the boundary-port registry (spec §3 Alias
//! Registry, §4.7, §4.8).
//!
//! Kept in memory rather than re-reading/rewriting a JSON document on every
//! change (spec §9 "Global alias DB" design note permits this); `to_document`
//! renders the same persisted shape described in spec §6 so a caller can
//! flush it through the Resource Store's private namespace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundaryPort {
    pub local_port_id: String,
    pub local_link_partner_id: String,
    pub remote_port_id: String,
    pub remote_link_partner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_port_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_peer_port_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_peer_switch_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_peer_endpoint_uri: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentAliasMap {
    pub aliases: HashMap<String, String>,
    #[serde(rename = "boundaryPorts", default)]
    pub boundary_ports: HashMap<String, BoundaryPort>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SunfishXref {
    pub aliases: HashMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AliasDocument {
    #[serde(rename = "Agents_xref_URIs", default)]
    pub agents_xref_uris: HashMap<String, AgentAliasMap>,
    #[serde(rename = "Sunfish_xref_URIs", default)]
    pub sunfish_xref_uris: SunfishXref,
}

#[derive(Default)]
pub struct AliasRegistry {
    inner: Mutex<AliasDocument>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_document(doc: AliasDocument) -> Self {
        Self {
            inner: Mutex::new(doc),
        }
    }

    pub async fn to_document(&self) -> AliasDocument {
        self.inner.lock().await.clone()
    }

    /// `agent_URI -> canonical_URI` (spec §3 `by_agent[agent_id].aliases`).
    pub async fn canonical_for(&self, agent_id: &str, agent_uri: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .agents_xref_uris
            .get(agent_id)
            .and_then(|m| m.aliases.get(agent_uri))
            .cloned()
    }

    /// `canonical_URI -> [agent_URI, ...]` (spec §3 `by_canonical.aliases`).
    pub async fn agent_uris_for(&self, canonical_uri: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .sunfish_xref_uris
            .aliases
            .get(canonical_uri)
            .cloned()
            .unwrap_or_default()
    }

    /// Records a new alias pair, maintaining the invariant that the two
    /// maps stay mutual inverses (spec §3 Invariants, §8 property 3).
    pub async fn record_alias(&self, agent_id: &str, agent_uri: &str, canonical_uri: &str) {
        let mut doc = self.inner.lock().await;
        doc.agents_xref_uris
            .entry(agent_id.to_string())
            .or_default()
            .aliases
            .insert(agent_uri.to_string(), canonical_uri.to_string());

        let agent_uris = doc
            .sunfish_xref_uris
            .aliases
            .entry(canonical_uri.to_string())
            .or_default();
        if !agent_uris.contains(&agent_uri.to_string()) {
            agent_uris.push(agent_uri.to_string());
        }
    }

    pub async fn register_boundary_port(&self, agent_id: &str, canonical_port_uri: &str, port: BoundaryPort) {
        let mut doc = self.inner.lock().await;
        doc.agents_xref_uris
            .entry(agent_id.to_string())
            .or_default()
            .boundary_ports
            .insert(canonical_port_uri.to_string(), port);
    }

    /// Snapshot of every `(agent_id, canonical_port_uri, port)` across all
    /// agents, used by the boundary-port matcher (spec §4.8) to scan for a
    /// newly-matchable peer.
    pub async fn all_boundary_ports(&self) -> Vec<(String, String, BoundaryPort)> {
        let doc = self.inner.lock().await;
        let mut out = Vec::new();
        for (agent_id, agent_map) in &doc.agents_xref_uris {
            for (uri, port) in &agent_map.boundary_ports {
                out.push((agent_id.clone(), uri.clone(), port.clone()));
            }
        }
        out
    }

    pub async fn set_peer_port_uri(&self, agent_id: &str, canonical_port_uri: &str, peer_uri: &str) {
        let mut doc = self.inner.lock().await;
        if let Some(port) = doc
            .agents_xref_uris
            .get_mut(agent_id)
            .and_then(|m| m.boundary_ports.get_mut(canonical_port_uri))
        {
            port.peer_port_uri = Some(peer_uri.to_string());
        }
    }

    pub async fn set_agent_peer_port_uri(&self, agent_id: &str, canonical_port_uri: &str, placeholder: &str) {
        self.set_boundary_field(agent_id, canonical_port_uri, |port| port.agent_peer_port_uri = Some(placeholder.to_string()))
            .await;
    }

    pub async fn set_agent_peer_switch_uri(&self, agent_id: &str, canonical_port_uri: &str, placeholder: &str) {
        self.set_boundary_field(agent_id, canonical_port_uri, |port| port.agent_peer_switch_uri = Some(placeholder.to_string()))
            .await;
    }

    pub async fn set_agent_peer_endpoint_uri(&self, agent_id: &str, canonical_port_uri: &str, placeholder: &str) {
        self.set_boundary_field(agent_id, canonical_port_uri, |port| port.agent_peer_endpoint_uri = Some(placeholder.to_string()))
            .await;
    }

    async fn set_boundary_field(&self, agent_id: &str, canonical_port_uri: &str, set: impl FnOnce(&mut BoundaryPort)) {
        let mut doc = self.inner.lock().await;
        if let Some(port) = doc
            .agents_xref_uris
            .get_mut(agent_id)
            .and_then(|m| m.boundary_ports.get_mut(canonical_port_uri))
        {
            set(port);
        }
    }

    pub async fn boundary_port(&self, agent_id: &str, canonical_port_uri: &str) -> Option<BoundaryPort> {
        self.inner
            .lock()
            .await
            .agents_xref_uris
            .get(agent_id)
            .and_then(|m| m.boundary_ports.get(canonical_port_uri))
            .cloned()
    }

    /// `canonical_URI -> agent_URI` for one specific agent, the inverse
    /// direction of `canonical_for`. Used when translating a payload bound
    /// outbound to an agent: a nested canonical id is only rewritten if that
    /// agent actually has an alias for it.
    pub async fn agent_uri_for(&self, agent_id: &str, canonical_uri: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .agents_xref_uris
            .get(agent_id)
            .and_then(|m| m.aliases.iter().find(|(_, canonical)| canonical.as_str() == canonical_uri))
            .map(|(agent_uri, _)| agent_uri.clone())
    }

    /// Drops every alias and boundary port this agent contributed. Used by
    /// `ClearResources` once the agent's resources have all been removed
    /// from the store.
    pub async fn clear_agent(&self, agent_id: &str) {
        let mut doc = self.inner.lock().await;
        let Some(agent_map) = doc.agents_xref_uris.remove(agent_id) else {
            return;
        };
        let mut emptied = Vec::new();
        for agent_uri in agent_map.aliases.keys() {
            for (canonical_uri, agent_uris) in doc.sunfish_xref_uris.aliases.iter_mut() {
                agent_uris.retain(|uri| uri != agent_uri);
                if agent_uris.is_empty() {
                    emptied.push(canonical_uri.clone());
                }
            }
        }
        for canonical_uri in emptied {
            doc.sunfish_xref_uris.aliases.remove(&canonical_uri);
        }
    }
}
