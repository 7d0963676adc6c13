//! Boundary-Port Resolver (spec §4.8): matches boundary ports discovered on
//! two different agents into a single cross-fabric link and redirects the
//! port's `Links` to point across the fabric boundary.
//!
//! Grounded on the `BoundaryPort`/`PeerPortURI` shape in spec §3 and the
//! `Links.ConnectedSwitchPorts`/`ConnectedPorts`/`AssociatedEndpoints`
//! cardinality discipline described in spec §4.8 (no direct counterpart in
//! the reference implementation, which never finished this half of
//! ingestion).

use crate::alias::{AliasRegistry, BoundaryPort};
use crate::error::CoreResult;
use crate::model::BoundaryComponent;
use crate::store::ResourceStore;
use serde_json::{json, Map, Value};
use tracing::warn;

/// A `Port` resource qualifies as a boundary port iff it speaks CXL, sits at
/// a fabric edge role, and the ingesting agent tagged it as such (spec
/// §4.8).
pub fn is_boundary_port(obj: &Value) -> bool {
    let protocol = obj.get("PortProtocol").and_then(Value::as_str);
    let port_type = obj.get("PortType").and_then(Value::as_str);
    let boundary = crate::model::boundary_component_of(obj);
    protocol == Some("CXL")
        && matches!(port_type, Some("InterswitchPort") | Some("UpstreamPort") | Some("DownstreamPort"))
        && matches!(boundary, Some(BoundaryComponent::BoundaryPort))
}

/// Reads `CXL.LinkPartnerTransmit`/`LinkPartnerReceive` off a boundary port
/// object into the registry's wire-identity shape.
pub fn extract_boundary_port(obj: &Value) -> Option<BoundaryPort> {
    let cxl = obj.get("CXL")?;
    let tx = cxl.get("LinkPartnerTransmit")?;
    let rx = cxl.get("LinkPartnerReceive")?;
    Some(BoundaryPort {
        local_port_id: tx.get("PortId")?.as_str()?.to_string(),
        local_link_partner_id: tx.get("LinkPartnerId")?.as_str()?.to_string(),
        remote_port_id: rx.get("PortId")?.as_str()?.to_string(),
        remote_link_partner_id: rx.get("LinkPartnerId")?.as_str()?.to_string(),
        ..Default::default()
    })
}

/// Two ports cross-reference each other when each side's local wire
/// identity equals the other side's remote wire identity (spec §4.8
/// Matching).
fn cross_references(a: &BoundaryPort, b: &BoundaryPort) -> bool {
    (a.local_port_id == b.remote_port_id && a.local_link_partner_id == b.remote_link_partner_id)
        && (a.remote_port_id == b.local_port_id && a.remote_link_partner_id == b.local_link_partner_id)
}

fn strip_segments(uri: &str, n: usize) -> String {
    let mut result = uri.trim_end_matches('/').to_string();
    for _ in 0..n {
        if let Some(idx) = result.rfind('/') {
            result.truncate(idx);
        }
    }
    result
}

/// Scans every registered boundary port across every agent for a new match.
/// Already-matched pairs (`peer_port_uri` already set) are skipped. Returns
/// the number of newly matched pairs.
pub async fn resolve_boundary_ports(store: &dyn ResourceStore, alias: &AliasRegistry) -> CoreResult<usize> {
    let ports = alias.all_boundary_ports().await;
    let mut matched = 0;

    for i in 0..ports.len() {
        let (agent_a, uri_a, port_a) = &ports[i];
        if port_a.peer_port_uri.is_some() {
            continue;
        }

        let mut candidate: Option<(&String, &String)> = None;
        for (j, (agent_b, uri_b, port_b)) in ports.iter().enumerate() {
            if i == j || agent_a == agent_b {
                continue;
            }
            if cross_references(port_a, port_b) {
                if candidate.is_some() {
                    warn!(uri = %uri_a, "ambiguous boundary port match, more than one candidate found");
                    candidate = None;
                    break;
                }
                candidate = Some((agent_b, uri_b));
            }
        }

        if let Some((agent_b, uri_b)) = candidate {
            alias.set_peer_port_uri(agent_a, uri_a, uri_b).await;
            alias.set_peer_port_uri(agent_b, uri_b, uri_a).await;
            redirect_links(store, alias, agent_a, uri_a, uri_b).await?;
            redirect_links(store, alias, agent_b, uri_b, uri_a).await?;
            matched += 1;
        }
    }

    Ok(matched)
}

/// Rewrites `port_uri`'s `Links` to point at `peer_uri` per its port role
/// (spec §4.8 Redirection), remembering whatever placeholder value it
/// replaces so it can still be recovered as `AgentPeer*URI`.
async fn redirect_links(store: &dyn ResourceStore, alias: &AliasRegistry, agent_id: &str, port_uri: &str, peer_uri: &str) -> CoreResult<()> {
    if !store.exists(port_uri).await {
        return Ok(());
    }
    let port = store.read(port_uri).await?;
    let port_type = port.get("PortType").and_then(Value::as_str).unwrap_or_default().to_string();

    match port_type.as_str() {
        "InterswitchPort" | "DownstreamPort" => {
            let peer_switch_uri = strip_segments(peer_uri, 2);
            if let Some(placeholder) = set_link_with_cardinality(store, port_uri, "ConnectedSwitchPorts", peer_uri).await? {
                alias.set_agent_peer_port_uri(agent_id, port_uri, &placeholder).await;
            }
            if let Some(placeholder) = set_link_with_cardinality(store, port_uri, "ConnectedSwitches", &peer_switch_uri).await? {
                alias.set_agent_peer_switch_uri(agent_id, port_uri, &placeholder).await;
            }
        }
        "UpstreamPort" => {
            if let Some(placeholder) = set_link_with_cardinality(store, port_uri, "ConnectedPorts", peer_uri).await? {
                alias.set_agent_peer_port_uri(agent_id, port_uri, &placeholder).await;
            }
            if let Some(endpoint_uri) = derive_peer_endpoint(store, peer_uri).await? {
                if let Some(placeholder) = set_link_with_cardinality(store, port_uri, "AssociatedEndpoints", &endpoint_uri).await? {
                    alias.set_agent_peer_endpoint_uri(agent_id, port_uri, &placeholder).await;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Applies the §4.8 cardinality policy to one `Links.<rel>` array: replaces
/// a lone placeholder entry, appends if empty, leaves untouched (logging an
/// error) if more than one entry is already present. Returns the
/// placeholder `@odata.id` it replaced, if any.
async fn set_link_with_cardinality(store: &dyn ResourceStore, port_uri: &str, rel: &str, target_uri: &str) -> CoreResult<Option<String>> {
    let port = store.read(port_uri).await?;
    let existing = port
        .get("Links")
        .and_then(|l| l.get(rel))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if existing.len() > 1 {
        warn!(port_uri, rel, "boundary link array already has more than one entry, leaving untouched");
        return Ok(None);
    }
    let placeholder = existing
        .first()
        .and_then(|v| v.get("@odata.id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut links = Map::new();
    links.insert(rel.to_string(), json!([{ "@odata.id": target_uri }]));
    let mut patch = Map::new();
    patch.insert("Links".to_string(), Value::Object(links));
    store.patch(port_uri, Value::Object(patch)).await?;

    Ok(placeholder)
}

/// Derives the `AssociatedEndpoints` target for an UpstreamPort: the first
/// `Links.Endpoints` entry of the host two tree levels above the peer port
/// (spec §4.8: "peer's grandparent host's Links.Endpoints[0]").
async fn derive_peer_endpoint(store: &dyn ResourceStore, peer_port_uri: &str) -> CoreResult<Option<String>> {
    let host_uri = strip_segments(peer_port_uri, 4);
    if !store.exists(&host_uri).await {
        return Ok(None);
    }
    let host = store.read(&host_uri).await?;
    Ok(host
        .get("Links")
        .and_then(|l| l.get("Endpoints"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("@odata.id"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryResourceStore;
    use serde_json::json as j;

    fn port(local: &str, local_partner: &str, remote: &str, remote_partner: &str) -> BoundaryPort {
        BoundaryPort {
            local_port_id: local.into(),
            local_link_partner_id: local_partner.into(),
            remote_port_id: remote.into(),
            remote_link_partner_id: remote_partner.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn matches_cross_referencing_interswitch_ports_and_redirects_links() {
        let store = MemoryResourceStore::new();
        store.seed(j!({ "@odata.id": "/redfish/v1" })).await;
        store
            .write(j!({
                "@odata.id": "/redfish/v1/Fabrics/CXL/Switches/S1/Ports/P1",
                "@odata.type": "#Port.v1.Port",
                "PortType": "InterswitchPort"
            }))
            .await
            .unwrap();
        store
            .write(j!({
                "@odata.id": "/redfish/v1/Fabrics/CXL/Switches/S2/Ports/P2",
                "@odata.type": "#Port.v1.Port",
                "PortType": "InterswitchPort"
            }))
            .await
            .unwrap();

        let alias = AliasRegistry::new();
        alias
            .register_boundary_port("agentA", "/redfish/v1/Fabrics/CXL/Switches/S1/Ports/P1", port("1", "A", "2", "B"))
            .await;
        alias
            .register_boundary_port("agentB", "/redfish/v1/Fabrics/CXL/Switches/S2/Ports/P2", port("2", "B", "1", "A"))
            .await;

        let matched = resolve_boundary_ports(&store, &alias).await.unwrap();
        assert_eq!(matched, 1);

        let p1 = store.read("/redfish/v1/Fabrics/CXL/Switches/S1/Ports/P1").await.unwrap();
        assert_eq!(p1["Links"]["ConnectedSwitchPorts"][0]["@odata.id"], "/redfish/v1/Fabrics/CXL/Switches/S2/Ports/P2");
        assert_eq!(p1["Links"]["ConnectedSwitches"][0]["@odata.id"], "/redfish/v1/Fabrics/CXL/Switches/S2");

        let p1_port = alias.boundary_port("agentA", "/redfish/v1/Fabrics/CXL/Switches/S1/Ports/P1").await.unwrap();
        assert_eq!(p1_port.peer_port_uri.as_deref(), Some("/redfish/v1/Fabrics/CXL/Switches/S2/Ports/P2"));
    }

    #[tokio::test]
    async fn leaves_ambiguous_matches_unresolved() {
        let store = MemoryResourceStore::new();
        let alias = AliasRegistry::new();
        alias.register_boundary_port("agentA", "/p/1", port("1", "A", "2", "B")).await;
        alias.register_boundary_port("agentB", "/p/2", port("2", "B", "1", "A")).await;
        alias.register_boundary_port("agentC", "/p/3", port("2", "B", "1", "A")).await;

        let matched = resolve_boundary_ports(&store, &alias).await.unwrap();
        assert_eq!(matched, 0);
    }
}
