//! Shared Redfish resource vocabulary used across the aggregation core:
//! `@odata.type` extraction, the `Oem.Sunfish_RM` ownership stamp, and the
//! JSON-tree walkers shared by the BFS ingestor and the alias-link updater.

use serde_json::{Map, Value};
use std::fmt;

/// Key under which every ownership/aliasing annotation this aggregator adds
/// to a resource lives. Never present in an agent's own view of a resource.
pub const OEM_NAMESPACE: &str = "Sunfish_RM";

/// A verb dispatched through the Ownership Router / Agent Client (spec §4.2,
/// §4.3). Named `SunfishRequestType` in the reference implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Replace,
    Patch,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "GET",
            Verb::Create => "CREATE",
            Verb::Replace => "REPLACE",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// `Oem.Sunfish_RM.BoundaryComponent` (spec §3 Data Model).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryComponent {
    Owned,
    BoundaryPort,
    Foreign,
    Unknown,
}

impl BoundaryComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryComponent::Owned => "owned",
            BoundaryComponent::BoundaryPort => "BoundaryPort",
            BoundaryComponent::Foreign => "foreign",
            BoundaryComponent::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owned" => Some(BoundaryComponent::Owned),
            "BoundaryPort" => Some(BoundaryComponent::BoundaryPort),
            "foreign" => Some(BoundaryComponent::Foreign),
            "unknown" => Some(BoundaryComponent::Unknown),
            _ => None,
        }
    }
}

/// Extracts the leading type token from an `@odata.type` schema tag, e.g.
/// `"#ComputerSystem.v1_9_0.ComputerSystem"` -> `"ComputerSystem"` (spec
/// §4.1 Type extraction).
pub fn extract_type_token(odata_type: &str) -> String {
    let trimmed = odata_type.strip_prefix('#').unwrap_or(odata_type);
    trimmed.split('.').next().unwrap_or(trimmed).to_string()
}

/// Reads the resource type of a stored/inbound JSON object from its
/// `@odata.type`, if present.
pub fn resource_type_of(value: &Value) -> Option<String> {
    value
        .get("@odata.type")
        .and_then(Value::as_str)
        .map(extract_type_token)
}

pub fn is_collection_type(type_token: &str) -> bool {
    type_token.contains("Collection")
}

/// Collections carry no version segment: a well-formed collection type is
/// the doubled, unversioned `#{Token}.{Token}` shape (e.g.
/// `#ComputerSystemCollection.ComputerSystemCollection`), unlike a resource
/// type's versioned middle segment. Grounded on
/// `examples/original_source/sunfishcorelib/storage_backend/utils.py`'s
/// `check_collection_type`.
pub fn is_well_formed_collection_type(odata_type: &str) -> bool {
    let token = extract_type_token(odata_type);
    odata_type.strip_prefix('#').unwrap_or(odata_type) == format!("{token}.{token}")
}

/// Ensures `obj["Oem"]["Sunfish_RM"]` exists as an object and returns a
/// mutable reference to it.
pub fn ensure_oem_stamp(obj: &mut Map<String, Value>) -> &mut Map<String, Value> {
    let oem = obj
        .entry("Oem")
        .or_insert_with(|| Value::Object(Map::new()));
    if !oem.is_object() {
        *oem = Value::Object(Map::new());
    }
    let oem_map = oem.as_object_mut().unwrap();
    let stamp = oem_map
        .entry(OEM_NAMESPACE)
        .or_insert_with(|| Value::Object(Map::new()));
    if !stamp.is_object() {
        *stamp = Value::Object(Map::new());
    }
    stamp.as_object_mut().unwrap()
}

pub fn managing_agent_of(obj: &Value) -> Option<String> {
    obj.get("Oem")?
        .get(OEM_NAMESPACE)?
        .get("ManagingAgent")?
        .get("@odata.id")?
        .as_str()
        .map(str::to_string)
}

pub fn boundary_component_of(obj: &Value) -> Option<BoundaryComponent> {
    obj.get("Oem")?
        .get(OEM_NAMESPACE)?
        .get("BoundaryComponent")?
        .as_str()
        .and_then(BoundaryComponent::parse)
}

/// Stamps `obj` as owned by `agent_id` (spec §4.9 Ownership Stamping).
/// If a *different* `ManagingAgent` is already present, overwrites it and
/// returns `true` so the caller can log a warning -- an agent should never
/// see this field before the aggregator sets it.
pub fn stamp_ownership(
    obj: &mut Map<String, Value>,
    agent_id: &str,
    default_boundary: BoundaryComponent,
) -> bool {
    let stamp = ensure_oem_stamp(obj);
    let existing = stamp
        .get("ManagingAgent")
        .and_then(|m| m.get("@odata.id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let overwrote_conflicting = matches!(&existing, Some(e) if e != agent_id);

    stamp.insert(
        "ManagingAgent".to_string(),
        serde_json::json!({ "@odata.id": agent_id }),
    );
    stamp
        .entry("BoundaryComponent")
        .or_insert_with(|| Value::String(default_boundary.as_str().to_string()));

    overwrote_conflicting
}

/// Iteratively (depth-first) visits every nested `"@odata.id"` string value
/// reachable from `value`, skipping any subtree rooted at a key named
/// `Sunfish_RM` (spec §4.6/§4.7/§9: "wrong namespace" / "do not descend into
/// Oem.Sunfish_RM"). `visit` is called with the path from `value` down to
/// the id (excluding the final `@odata.id` key itself) and the id string.
/// Matches the reference's `handleNestedObject`/`findNestedURIs` walkers.
pub fn walk_odata_ids<'a>(value: &'a Value, visit: &mut impl FnMut(&'a str)) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if key == OEM_NAMESPACE {
                    continue;
                }
                if key == "@odata.id" {
                    if let Some(s) = val.as_str() {
                        visit(s);
                    }
                    continue;
                }
                if val.is_object() || val.is_array() {
                    walk_odata_ids(val, visit);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() || item.is_array() {
                    walk_odata_ids(item, visit);
                }
            }
        }
        _ => {}
    }
}

/// Rewrites every nested `@odata.id` (never the object's own top-level one)
/// for which `rewrite` returns `Some(new_value)`. Skips `Sunfish_RM`
/// subtrees. Returns `true` if anything was rewritten.
pub fn rewrite_nested_odata_ids(value: &mut Value, rewrite: &mut impl FnMut(&str) -> Option<String>) -> bool {
    rewrite_nested_odata_ids_inner(value, rewrite, true)
}

fn rewrite_nested_odata_ids_inner(
    value: &mut Value,
    rewrite: &mut impl FnMut(&str) -> Option<String>,
    is_root: bool,
) -> bool {
    let mut changed = false;
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if key == OEM_NAMESPACE {
                    continue;
                }
                if key == "@odata.id" && !is_root {
                    if let Some(Value::String(s)) = map.get(&key) {
                        if let Some(new_val) = rewrite(s) {
                            map.insert(key.clone(), Value::String(new_val));
                            changed = true;
                        }
                    }
                    continue;
                }
                if let Some(child) = map.get_mut(&key) {
                    if child.is_object() || child.is_array() {
                        if rewrite_nested_odata_ids_inner(child, rewrite, false) {
                            changed = true;
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                if item.is_object() || item.is_array() {
                    if rewrite_nested_odata_ids_inner(item, rewrite, false) {
                        changed = true;
                    }
                }
            }
        }
        _ => {}
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_leading_type_token() {
        assert_eq!(extract_type_token("#ComputerSystem.v1_9_0.ComputerSystem"), "ComputerSystem");
        assert_eq!(extract_type_token("#Event.v1_3_0.Event"), "Event");
    }

    #[test]
    fn stamp_ownership_sets_defaults_once() {
        let mut obj = Map::new();
        let overwrote = stamp_ownership(&mut obj, "/redfish/v1/AggregationService/AggregationSources/a1", BoundaryComponent::Owned);
        assert!(!overwrote);
        assert_eq!(managing_agent_of(&Value::Object(obj.clone())).unwrap(), "/redfish/v1/AggregationService/AggregationSources/a1");
        assert_eq!(boundary_component_of(&Value::Object(obj)).unwrap(), BoundaryComponent::Owned);
    }

    #[test]
    fn stamp_ownership_flags_conflicting_overwrite() {
        let mut obj = Map::new();
        stamp_ownership(&mut obj, "agent-a", BoundaryComponent::Owned);
        let overwrote = stamp_ownership(&mut obj, "agent-b", BoundaryComponent::Owned);
        assert!(overwrote);
        assert_eq!(managing_agent_of(&Value::Object(obj)).unwrap(), "agent-b");
    }

    #[test]
    fn walk_skips_oem_namespace_but_finds_links() {
        let v = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "Links": {
                "Chassis": [{ "@odata.id": "/redfish/v1/Chassis/1" }]
            },
            "Oem": {
                "Sunfish_RM": {
                    "ManagingAgent": { "@odata.id": "/redfish/v1/AggregationService/AggregationSources/a1" }
                }
            }
        });
        let mut found = Vec::new();
        walk_odata_ids(&v, &mut |id| found.push(id.to_string()));
        assert!(found.contains(&"/redfish/v1/Systems/1".to_string()));
        assert!(found.contains(&"/redfish/v1/Chassis/1".to_string()));
        assert!(!found.iter().any(|id| id.contains("AggregationSources")));
    }

    #[test]
    fn rewrite_leaves_top_level_id_alone() {
        let mut v = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "Links": {
                "Chassis": [{ "@odata.id": "/redfish/v1/Chassis/1" }]
            }
        });
        let changed = rewrite_nested_odata_ids(&mut v, &mut |id| {
            if id == "/redfish/v1/Chassis/1" {
                Some("/redfish/v1/Chassis/Sunfish_abcd_1".to_string())
            } else {
                None
            }
        });
        assert!(changed);
        assert_eq!(v["@odata.id"], "/redfish/v1/Systems/1");
        assert_eq!(v["Links"]["Chassis"][0]["@odata.id"], "/redfish/v1/Chassis/Sunfish_abcd_1");
    }
}
