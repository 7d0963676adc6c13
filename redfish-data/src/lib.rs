use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResourceSchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub errata: u32,
}

impl ResourceSchemaVersion {
    pub fn new(major: u32, minor: u32, errata: u32) -> Self {
        Self { major, minor, errata }
    }
}

impl fmt::Display for ResourceSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}_{}_{}", self.major, self.minor, self.errata)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CollectionSchemaVersion {
    pub version: u32,
}

impl CollectionSchemaVersion {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl fmt::Display for CollectionSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceType {
    pub name: String,
    pub version: ResourceSchemaVersion,
    pub xml_schema_uri: String,
    pub described_by: Option<String>,
}

impl ResourceType {
    pub fn new_dmtf(name: impl Into<String>, version: ResourceSchemaVersion) -> Self {
        let name = name.into();
        Self {
            xml_schema_uri: format!("http://redfish.dmtf.org/schemas/v1/{name}_v{}.xml", version.major),
            described_by: None,
            name,
            version,
        }
    }

    fn versioned_name(&self) -> String {
        format!("{}.{}", self.name, self.version)
    }

    pub fn to_xml(&self) -> String {
        format!(
            "  <edmx:Reference Uri=\"{}\">\n    <edmx:Include Namespace=\"{}\" />\n    <edmx:Include Namespace=\"{}\" />\n  </edmx:Reference>\n",
            self.xml_schema_uri,
            self.name,
            self.versioned_name()
        )
    }
}

#[derive(Clone, Debug)]
pub struct CollectionType {
    pub name: String,
    pub xml_schema_uri: String,
    pub described_by: Option<String>,
}

impl CollectionType {
    pub fn new_dmtf_v1(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            xml_schema_uri: format!("http://redfish.dmtf.org/schemas/v1/{name}Collection.xml"),
            described_by: None,
            name,
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "  <edmx:Reference Uri=\"{}\">\n    <edmx:Include Namespace=\"{}Collection\" />\n  </edmx:Reference>\n",
            self.xml_schema_uri, self.name
        )
    }
}

/// The set of HTTP methods a resource or collection supports, rendered for
/// the `Allow` header. `HEAD` always accompanies `GET`, `PUT` always
/// accompanies `PATCH`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllowedMethods {
    pub get: bool,
    pub post: bool,
    pub patch: bool,
    pub delete: bool,
}

impl AllowedMethods {
    pub fn resource(patch: bool, delete: bool) -> Self {
        Self { get: true, post: false, patch, delete }
    }

    pub fn collection(post: bool) -> Self {
        Self { get: true, post, patch: false, delete: false }
    }
}

impl fmt::Display for AllowedMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods = Vec::new();
        if self.get {
            methods.push("GET");
            methods.push("HEAD");
        }
        if self.post {
            methods.push("POST");
        }
        if self.patch {
            methods.push("PATCH");
            methods.push("PUT");
        }
        if self.delete {
            methods.push("DELETE");
        }
        write!(f, "{}", methods.join(","))
    }
}

/// Last path segment of a `@odata.id`-shaped URI, used as a resource's `Id`
/// when nothing more specific is available.
pub fn get_uri_id(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}

pub fn get_odata_metadata_document(collection_types: &[CollectionType], resource_types: &[ResourceType]) -> String {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    body.push_str("<edmx:Edmx xmlns:edmx=\"http://docs.oasis-open.org/odata/ns/edmx\" Version=\"4.0\">\n");
    for resource_type in resource_types {
        body.push_str(&resource_type.to_xml());
    }
    for collection_type in collection_types {
        body.push_str(&collection_type.to_xml());
    }
    body.push_str("  <edmx:DataServices>\n");
    body.push_str("    <Schema xmlns=\"http://docs.oasis-open.org/odata/ns/edm\" Namespace=\"Service\">\n");
    body.push_str("      <EntityContainer Name=\"Service\" />\n");
    body.push_str("    </Schema>\n");
    body.push_str("  </edmx:DataServices>\n");
    body.push_str("</edmx:Edmx>\n");
    body
}

/// Renders the OData JSON service document from the service root's body:
/// one `{name, kind: "Singleton", url}` entry per child carrying its own
/// `@odata.id`, skipping `@`-prefixed keys and the bookkeeping fields every
/// resource carries (`Id`, `Name`, `Oem`).
pub fn get_odata_service_document(service_root: &Map<String, Value>) -> Value {
    let mut values = Vec::new();
    for (key, val) in service_root {
        if key.starts_with('@') || key == "Id" || key == "Name" || key == "Oem" {
            continue;
        }
        if let Some(url) = val.get("@odata.id").and_then(Value::as_str) {
            values.push(serde_json::json!({
                "name": key,
                "kind": "Singleton",
                "url": url,
            }));
        }
    }
    serde_json::json!({
        "@odata.context": "/redfish/v1/$metadata",
        "value": values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_schema_version_renders_dmtf_token() {
        let v = ResourceSchemaVersion::new(1, 9, 0);
        assert_eq!(v.to_string(), "v1_9_0");
    }

    #[test]
    fn allowed_methods_pairs_head_and_put() {
        let methods = AllowedMethods::resource(true, true);
        assert_eq!(methods.to_string(), "GET,HEAD,PATCH,PUT,DELETE");
    }

    #[test]
    fn collection_allows_post_only_when_configured() {
        assert_eq!(AllowedMethods::collection(true).to_string(), "GET,HEAD,POST");
        assert_eq!(AllowedMethods::collection(false).to_string(), "GET,HEAD");
    }

    #[test]
    fn uri_id_is_last_path_segment() {
        assert_eq!(get_uri_id("/redfish/v1/Systems/1"), "1");
        assert_eq!(get_uri_id("/redfish/v1/Systems/1/"), "1");
    }

    #[test]
    fn service_document_lists_odata_id_children_only() {
        let root = serde_json::json!({
            "Id": "RootService",
            "Name": "Root Service",
            "Systems": { "@odata.id": "/redfish/v1/Systems" },
            "Oem": { "Sunfish_RM": {} },
        });
        let doc = get_odata_service_document(root.as_object().unwrap());
        let values = doc["value"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["name"], "Systems");
        assert_eq!(values[0]["url"], "/redfish/v1/Systems");
    }
}
