use anyhow::Context;
use async_trait::async_trait;
use redfish_axum::{Error as EdgeError, Node, Tree};
use redfish_data::{AllowedMethods, CollectionType, ResourceSchemaVersion, ResourceType};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use sunfish_core::agent_client::ReqwestAgentTransport;
use sunfish_core::alias::AliasRegistry;
use sunfish_core::config::Config;
use sunfish_core::error::CoreError;
use sunfish_core::facade::CoreFacade;
use sunfish_core::store::MemoryResourceStore;
use sunfish_core::subscriptions::SubscriptionIndex;
use std::time::Duration;

struct CoreNode {
    uri: String,
    body: Value,
}

fn is_collection_body(body: &Value) -> bool {
    body.get("@odata.type")
        .and_then(Value::as_str)
        .map(|t| t.contains("Collection"))
        .unwrap_or(false)
}

impl Node for CoreNode {
    fn get_uri(&self) -> &str {
        &self.uri
    }

    fn get_body(&self) -> Value {
        self.body.clone()
    }

    fn get_allowed_methods(&self) -> AllowedMethods {
        if is_collection_body(&self.body) {
            AllowedMethods::collection(true)
        } else {
            AllowedMethods::resource(true, true)
        }
    }

    fn described_by(&self) -> Option<&str> {
        None
    }
}

/// Adapts `sunfish-core`'s `CoreFacade` to the transport-agnostic
/// `redfish_axum::Tree` interface.
struct CoreTree {
    facade: CoreFacade,
}

fn edge_error(err: CoreError) -> EdgeError {
    match err {
        CoreError::ResourceNotFound(_) => EdgeError::NotFound,
        CoreError::PropertyNotFound(msg) => EdgeError::BadRequest(msg),
        CoreError::CollectionNotSupported => EdgeError::MethodNotAllowed(AllowedMethods::collection(false)),
        CoreError::AlreadyExists(msg) => EdgeError::Conflict(msg),
        CoreError::ActionNotAllowed => EdgeError::Forbidden,
        CoreError::InvalidPath(msg) => EdgeError::BadRequest(msg),
        CoreError::IllegalCollectionType(msg) => EdgeError::BadRequest(msg),
        CoreError::IllegalSubscription => EdgeError::BadRequest("illegal subscription".to_string()),
        CoreError::DestinationError => EdgeError::BadGateway("subscriber destination unreachable".to_string()),
        CoreError::AgentForwardingFailure { operation, status, reason } => {
            EdgeError::BadGateway(format!("agent forwarding failed during {operation}: status {status}, {reason}"))
        }
    }
}

#[async_trait]
impl Tree for CoreTree {
    async fn get(&self, uri: &str, _username: Option<&str>) -> Result<Box<dyn Node>, EdgeError> {
        let body = self.facade.get(uri).await.map_err(edge_error)?;
        Ok(Box::new(CoreNode { uri: uri.to_string(), body }))
    }

    async fn create(&self, uri: &str, req: Map<String, Value>, _username: Option<&str>) -> Result<Box<dyn Node>, EdgeError> {
        let body = self.facade.create(uri, req).await.map_err(edge_error)?;
        let new_uri = body.get("@odata.id").and_then(Value::as_str).unwrap_or(uri).to_string();
        Ok(Box::new(CoreNode { uri: new_uri, body }))
    }

    async fn delete(&self, uri: &str, _username: Option<&str>) -> Result<(), EdgeError> {
        self.facade.delete(uri).await.map_err(edge_error)
    }

    async fn patch(&self, uri: &str, req: Map<String, Value>, _username: Option<&str>) -> Result<Box<dyn Node>, EdgeError> {
        let body = self.facade.patch(uri, Value::Object(req)).await.map_err(edge_error)?;
        Ok(Box::new(CoreNode { uri: uri.to_string(), body }))
    }

    async fn replace(&self, uri: &str, req: Map<String, Value>, _username: Option<&str>) -> Result<Box<dyn Node>, EdgeError> {
        let mut req = req;
        req.entry("@odata.id").or_insert_with(|| Value::String(uri.to_string()));
        let body = self.facade.replace(uri, Value::Object(req)).await.map_err(edge_error)?;
        Ok(Box::new(CoreNode { uri: uri.to_string(), body }))
    }

    fn get_collection_types(&self) -> Vec<CollectionType> {
        vec![
            CollectionType::new_dmtf_v1("ComputerSystem"),
            CollectionType::new_dmtf_v1("Chassis"),
            CollectionType::new_dmtf_v1("Fabric"),
            CollectionType::new_dmtf_v1("AggregationSource"),
            CollectionType::new_dmtf_v1("EventDestination"),
        ]
    }

    fn get_resource_types(&self) -> Vec<ResourceType> {
        vec![
            ResourceType::new_dmtf("ServiceRoot", ResourceSchemaVersion::new(1, 15, 0)),
            ResourceType::new_dmtf("ComputerSystem", ResourceSchemaVersion::new(1, 9, 0)),
            ResourceType::new_dmtf("Chassis", ResourceSchemaVersion::new(1, 9, 0)),
            ResourceType::new_dmtf("Fabric", ResourceSchemaVersion::new(1, 2, 0)),
            ResourceType::new_dmtf("AggregationSource", ResourceSchemaVersion::new(1, 1, 0)),
            ResourceType::new_dmtf("EventDestination", ResourceSchemaVersion::new(1, 9, 0)),
        ]
    }

    async fn handle_event(&self, envelope: Value) -> Result<Vec<String>, EdgeError> {
        self.facade.handle_event(&envelope).await.map_err(edge_error)
    }
}

fn seed_service_root(store: &MemoryResourceStore, redfish_root: &str) {
    let root = redfish_root.trim_end_matches('/');
    store.seed(json!({
        "@odata.id": root,
        "@odata.type": "#ServiceRoot.v1_15_0.ServiceRoot",
        "Id": "RootService",
        "Name": "Sunfish Aggregation Service",
        "AggregationService": { "@odata.id": format!("{root}/AggregationService") },
        "EventService": { "@odata.id": format!("{root}/EventService") },
    }));
}

async fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var("SUNFISH_CONFIG").unwrap_or_else(|_| "sunfish.toml".to_string());
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading configuration file at {path}"))?;
    Config::from_toml_str(&contents).with_context(|| format!("parsing configuration file at {path}"))
}

/// Builds the full aggregator stack behind a fresh in-memory store, the
/// shape shared by `main` and the integration tests below (teacher's own
/// `fn app()` test helper in
/// `examples/blakehilliard-rusty-redfishery/src/main.rs` follows the same
/// pattern: one function builds the `Tree`-backed router, tests drive it
/// with `tower::ServiceExt::oneshot`).
fn build_app(config: &Config) -> tower_http::normalize_path::NormalizePath<axum::Router> {
    let store = Arc::new(MemoryResourceStore::new());
    seed_service_root(&store, &config.redfish_root);

    let alias = Arc::new(AliasRegistry::new());
    let subscriptions = Arc::new(SubscriptionIndex::new());

    let transport = Arc::new(ReqwestAgentTransport::new(Duration::from_secs(config.agent_client.timeout_secs)));

    let facade = CoreFacade::new(store, alias, subscriptions, transport, config.redfish_root.clone());
    let tree = CoreTree { facade };

    redfish_axum::app(tree)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config().await?;
    let app = build_app(&config);

    tracing::info!("listening on 0.0.0.0:3000");
    axum::Server::bind(&"0.0.0.0:3000".parse().unwrap())
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
