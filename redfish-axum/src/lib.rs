use async_trait::async_trait;
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use http::{
    header::{self},
    HeaderMap, HeaderName, HeaderValue,
};
use http_auth_basic;
use redfish_data::{
    get_odata_metadata_document, get_odata_service_document, AllowedMethods, CollectionType,
    ResourceType,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower::layer::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use uuid::Uuid;

mod json;
use json::JsonResponse;

#[derive(Debug)]
pub enum Error {
    NotFound,
    Unauthorized,
    MethodNotAllowed(AllowedMethods),
    BadODataVersion,
    BadRequest(String),
    Conflict(String),
    Forbidden,
    BadGateway(String),
}

pub trait Node: Send + Sync {
    fn get_uri(&self) -> &str;
    fn get_body(&self) -> Value;
    fn get_allowed_methods(&self) -> AllowedMethods;
    fn described_by(&self) -> Option<&str>;
}

/// Generic over the backing resource tree. Node instances are returned owned
/// rather than borrowed: a dynamic tree (backed by a lock-guarded store, or
/// by HTTP calls to remote agents) cannot hand out a reference to `&self`
/// that survives an `await`, so every read produces a fresh `Box<dyn Node>`.
#[async_trait]
pub trait Tree: Send + Sync {
    async fn get(&self, uri: &str, username: Option<&str>) -> Result<Box<dyn Node>, Error>;

    async fn create(
        &self,
        uri: &str,
        req: Map<String, Value>,
        username: Option<&str>,
    ) -> Result<Box<dyn Node>, Error>;

    async fn delete(&self, uri: &str, username: Option<&str>) -> Result<(), Error>;

    async fn patch(
        &self,
        uri: &str,
        req: Map<String, Value>,
        username: Option<&str>,
    ) -> Result<Box<dyn Node>, Error>;

    /// Full replace of an existing resource (spec §4.1 `replace`). The
    /// reference agent-wire client is free to send this as PATCH or PUT
    /// (spec §4.2 Open Question); at this edge the two verbs stay distinct
    /// so callers that actually mean "overwrite the whole object" get that
    /// semantic rather than a merge.
    async fn replace(
        &self,
        uri: &str,
        req: Map<String, Value>,
        username: Option<&str>,
    ) -> Result<Box<dyn Node>, Error>;

    fn get_collection_types(&self) -> Vec<CollectionType>;

    fn get_resource_types(&self) -> Vec<ResourceType>;

    /// Accepts an Event envelope and returns the ids of subscribers
    /// notified. The default no-op lets trees that never ingest events
    /// (tests, static mocks) skip implementing it.
    async fn handle_event(&self, _envelope: Value) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }
}

pub fn app<T: Tree + Send + Sync + 'static>(tree: T) -> NormalizePath<Router> {
    let state = AppState {
        tree: Arc::new(tree),
        sessions: Arc::new(std::sync::RwLock::new(Vec::new())),
    };

    let app = Router::new()
        .route("/redfish", get(get_redfish))
        .route("/redfish/v1/$metadata", get(get_odata_metadata_doc))
        .route("/redfish/v1/odata", get(get_odata_service_doc))
        .route("/redfish/v1/EventListener", post(event_ingress))
        .route(
            "/redfish/*path",
            get(getter).post(poster).delete(deleter).patch(patcher).put(putter),
        )
        .with_state(state);

    NormalizePathLayer::trim_trailing_slash().layer(app)
}

struct Session {
    token: String,
    username: String,
    uri: String,
}

#[derive(Clone)]
struct AppState {
    tree: Arc<dyn Tree + Send + Sync>,
    sessions: Arc<std::sync::RwLock<Vec<Session>>>,
}

fn validate_odata_version(headers: &HeaderMap) -> Result<(), Error> {
    if let Some(odata_version) = headers.get("odata-version") {
        if odata_version != "4.0" {
            return Err(Error::BadODataVersion);
        }
    }
    Ok(())
}

#[debug_handler]
async fn getter(
    headers: HeaderMap,
    Path(path): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    let uri = "/redfish/".to_owned() + &path;
    let user = get_request_username(&headers, &state)?;
    let node = state.tree.get(uri.as_str(), user.as_deref()).await?;
    Ok(get_node_get_response(node.as_ref()))
}

#[debug_handler]
async fn deleter(
    headers: HeaderMap,
    Path(path): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    let uri = "/redfish/".to_owned() + &path;
    let user = get_request_username(&headers, &state)?;

    state.tree.delete(uri.as_str(), user.as_deref()).await?;
    let mut sessions = state.sessions.write().unwrap();
    for index in 0..sessions.len() {
        if sessions[index].uri == uri {
            sessions.swap_remove(index);
            break;
        }
    }
    // Spec's status mapping (§6) calls out DELETE success as 200, not the
    // plain CRUD edge's usual 204 -- the aggregator's DELETE response still
    // carries a body-less JSON success the same way GET/PATCH do.
    Ok((StatusCode::OK, [("Cache-Control", "no-cache")]))
}

#[debug_handler]
async fn poster(
    headers: HeaderMap,
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;

    let mut uri = "/redfish/".to_owned() + &path;
    if let Some(stripped) = uri.strip_suffix("/Members") {
        uri = stripped.to_string();
    }

    let user = get_request_username(&headers, &state)?;

    let node = state.tree.create(uri.as_str(), payload, user.as_deref()).await?;
    let mut additional_headers = HeaderMap::new();
    if uri == "/redfish/v1/SessionService/Sessions" {
        let token = Uuid::new_v4().as_simple().to_string();
        let username = node
            .get_body()
            .as_object()
            .unwrap()
            .get("UserName")
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        let session = Session {
            token: token.clone(),
            username,
            uri: node.get_uri().to_string(),
        };
        state.sessions.write().unwrap().push(session);
        let header_val = HeaderValue::from_str(token.as_str()).unwrap();
        additional_headers.insert("x-auth-token", header_val);
    }
    Ok(get_node_created_response(node.as_ref(), additional_headers))
}

#[debug_handler]
async fn patcher(
    headers: HeaderMap,
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    let uri = "/redfish/".to_owned() + &path;
    let user = get_request_username(&headers, &state)?;

    let node = state.tree.patch(uri.as_str(), payload, user.as_deref()).await?;
    Ok(get_node_get_response(node.as_ref()))
}

#[debug_handler]
async fn putter(
    headers: HeaderMap,
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    let uri = "/redfish/".to_owned() + &path;
    let user = get_request_username(&headers, &state)?;

    let node = state.tree.replace(uri.as_str(), payload, user.as_deref()).await?;
    Ok(get_node_get_response(node.as_ref()))
}

async fn event_ingress(
    State(state): State<AppState>,
    Json(envelope): Json<Value>,
) -> Result<impl IntoResponse, Error> {
    let notified = state.tree.handle_event(envelope).await?;
    Ok(get_non_node_json_response(
        StatusCode::OK,
        json!({ "NotifiedSubscribers": notified }),
        "POST",
    ))
}

async fn get_redfish(headers: HeaderMap) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    Ok(get_non_node_json_response(
        StatusCode::OK,
        json!({ "v1": "/redfish/v1/" }),
        "GET,HEAD",
    ))
}

async fn get_odata_metadata_doc(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    validate_odata_version(&headers)?;
    let body = get_odata_metadata_document(&state.tree.get_collection_types(), &state.tree.get_resource_types());
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        [(header::ALLOW, "GET,HEAD")],
        COMMON_RESPONSE_HEADERS,
        body,
    ))
}

async fn get_odata_service_doc(State(state): State<AppState>) -> impl IntoResponse {
    let service_root = state.tree.get("/redfish/v1", None).await;
    get_non_node_json_response(
        StatusCode::OK,
        get_odata_service_document(service_root.unwrap().get_body().as_object().unwrap()),
        "GET,HEAD",
    )
}

fn node_to_allow(node: &dyn Node) -> String {
    node.get_allowed_methods().to_string()
}

fn get_described_by_header_value(node: &dyn Node) -> Option<HeaderValue> {
    if let Some(described_by) = node.described_by() {
        let val = format!("<{}>; rel=describedby", described_by);
        if let Ok(val) = HeaderValue::from_str(val.as_str()) {
            return Some(val);
        }
    }
    None
}

fn get_node_etag_header_value(node: &dyn Node) -> Option<HeaderValue> {
    let body = node.get_body();
    if body.is_object() {
        if let Some(etag) = body.as_object().unwrap().get("@odata.etag") {
            if let Ok(val) = HeaderValue::from_str(etag.as_str()?) {
                return Some(val);
            }
        }
    }
    None
}

fn add_node_headers(headers: &mut HeaderMap, node: &dyn Node) {
    if let Some(described_by) = get_described_by_header_value(node) {
        headers.insert(header::LINK, described_by);
    }
    if let Some(etag) = get_node_etag_header_value(node) {
        headers.insert(header::ETAG, etag);
    }
}

fn get_node_get_response(node: &dyn Node) -> impl IntoResponse {
    let mut headers = get_standard_headers(node_to_allow(node).as_str());
    add_node_headers(&mut headers, node);
    JsonResponse::new(StatusCode::OK, headers, node.get_body())
}

fn get_node_created_response(node: &dyn Node, additional_headers: HeaderMap) -> impl IntoResponse {
    let mut headers = get_standard_headers(node_to_allow(node).as_str());
    headers.extend(additional_headers);
    add_node_headers(&mut headers, node);
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(node.get_uri()).unwrap(),
    );
    JsonResponse::new(StatusCode::CREATED, headers, node.get_body())
}

fn get_non_node_json_response(status: StatusCode, data: Value, allow: &str) -> impl IntoResponse {
    JsonResponse::new(status, get_standard_headers(allow), data)
}

fn get_standard_headers(allow: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ALLOW, HeaderValue::from_str(allow).unwrap());
    headers.insert(
        HeaderName::from_static("odata-version"),
        HeaderValue::from_static("4.0"),
    );
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-cache"),
    );
    headers
}

const COMMON_RESPONSE_HEADERS: ([(&str, &str); 1], [(&str, &str); 1]) =
    ([("OData-Version", "4.0")], [("Cache-Control", "no-cache")]);

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => (StatusCode::NOT_FOUND, COMMON_RESPONSE_HEADERS).into_response(),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                COMMON_RESPONSE_HEADERS,
                [("www-authenticate", "Basic realm=\"simple\"")],
            )
                .into_response(),
            Error::MethodNotAllowed(allowed) => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, allowed.to_string())],
                COMMON_RESPONSE_HEADERS,
            )
                .into_response(),
            Error::BadODataVersion => {
                (StatusCode::PRECONDITION_FAILED, COMMON_RESPONSE_HEADERS).into_response()
            }
            Error::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                COMMON_RESPONSE_HEADERS,
                Json(json!({ "error": reason })),
            )
                .into_response(),
            Error::Forbidden => (StatusCode::FORBIDDEN, COMMON_RESPONSE_HEADERS).into_response(),
            Error::Conflict(reason) => (
                StatusCode::CONFLICT,
                COMMON_RESPONSE_HEADERS,
                Json(json!({ "error": reason })),
            )
                .into_response(),
            Error::BadGateway(reason) => (
                StatusCode::BAD_GATEWAY,
                COMMON_RESPONSE_HEADERS,
                Json(json!({ "error": reason })),
            )
                .into_response(),
        }
    }
}

fn get_token_user(token: String, state: &AppState) -> Option<String> {
    for session in state.sessions.read().unwrap().iter() {
        if session.token == token {
            return Some(session.username.clone());
        }
    }
    None
}

fn get_request_username(headers: &HeaderMap, state: &AppState) -> Result<Option<String>, Error> {
    match headers.get("x-auth-token") {
        Some(token) => match get_token_user(token.to_str().unwrap().to_string(), state) {
            None => Err(Error::Unauthorized),
            Some(user) => Ok(Some(user)),
        },
        None => match headers.get("authorization") {
            None => Ok(None),
            Some(header_val) => match http_auth_basic::Credentials::from_header(
                header_val.to_str().unwrap().to_string(),
            ) {
                Err(_) => Err(Error::Unauthorized),
                Ok(credentials) => Ok(Some(credentials.user_id)),
            },
        },
    }
}
