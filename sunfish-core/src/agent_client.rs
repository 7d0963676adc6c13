//! Agent Client: southbound HTTP transport to agent processes (spec §4.3).
//!
//! Grounded on `examples/original_source/sunfish/lib/sunfish_agent_manager.py`,
//! which issues a GET/POST/PATCH/DELETE against `<HostName><path>` with a
//! `Content-Type: application/json` header and maps non-2xx responses onto
//! the same exception the aggregation core raises for its own local errors.

use crate::error::CoreError;
use crate::model::Verb;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One registered southbound agent (spec §3 AggregationSource).
#[derive(Clone, Debug)]
pub struct AgentEndpoint {
    pub agent_id: String,
    pub host_name: String,
}

/// Transport seam between the core and the wire, so the router/BFS ingestor
/// can be exercised in tests without a real network (spec §9 "Agent Client
/// as a trait").
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn get(&self, endpoint: &AgentEndpoint, path: &str) -> Result<Value, CoreError>;
    async fn create(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError>;
    /// Replaces a resource. May be sent as PATCH or PUT on the wire -- the
    /// agent is required to treat both as a full replace (spec §4.2 Open
    /// Question: PATCH-vs-PUT equivalence).
    async fn replace(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError>;
    async fn patch(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError>;
    async fn delete(&self, endpoint: &AgentEndpoint, path: &str) -> Result<(), CoreError>;
    /// Posts an event envelope to a subscriber's `Destination` (spec §4.4
    /// Event Forwarder). Not scoped to one agent, hence the plain URL.
    async fn post_event(&self, destination_url: &str, body: &Value) -> Result<(), CoreError>;
}

fn verb_name(verb: Verb) -> &'static str {
    match verb {
        Verb::Get => "get",
        Verb::Create => "create",
        Verb::Replace => "replace",
        Verb::Patch => "patch",
        Verb::Delete => "delete",
    }
}

/// `reqwest`-backed transport used in production (spec §5 default timeout
/// 30s, no retries).
pub struct ReqwestAgentTransport {
    client: reqwest::Client,
}

impl ReqwestAgentTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(Duration::from_secs(30))
    }

    async fn dispatch(&self, verb: Verb, url: &str, body: Option<&Value>) -> Result<Value, CoreError> {
        let mut req = match verb {
            Verb::Get => self.client.get(url),
            Verb::Create => self.client.post(url),
            Verb::Replace => self.client.patch(url),
            Verb::Patch => self.client.patch(url),
            Verb::Delete => self.client.delete(url),
        };
        if let Some(body) = body {
            req = req.header("Content-Type", "application/json").json(body);
        }

        let response = req.send().await.map_err(|e| {
            CoreError::agent_forwarding(verb_name(verb), CoreError::TRANSPORT_FAILURE_STATUS, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(CoreError::agent_forwarding(verb_name(verb), status.as_u16() as i32, reason));
        }

        // DELETE success bodies are empty as often as not (spec §4.3: 200/202/204
        // all parse as "{}" for DELETE) -- never attempt to parse one as JSON.
        if status.as_u16() == 204 || verb == Verb::Delete {
            return Ok(Value::Null);
        }

        let bytes = response.bytes().await.map_err(|e| {
            CoreError::agent_forwarding(verb_name(verb), CoreError::TRANSPORT_FAILURE_STATUS, e.to_string())
        })?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::agent_forwarding(verb_name(verb), CoreError::TRANSPORT_FAILURE_STATUS, e.to_string()))
    }
}

#[async_trait]
impl AgentTransport for ReqwestAgentTransport {
    async fn get(&self, endpoint: &AgentEndpoint, path: &str) -> Result<Value, CoreError> {
        let url = format!("{}{}", endpoint.host_name, path);
        self.dispatch(Verb::Get, &url, None).await
    }

    async fn create(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
        let url = format!("{}{}", endpoint.host_name, path);
        self.dispatch(Verb::Create, &url, Some(body)).await
    }

    async fn replace(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
        let url = format!("{}{}", endpoint.host_name, path);
        self.dispatch(Verb::Replace, &url, Some(body)).await
    }

    async fn patch(&self, endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
        let url = format!("{}{}", endpoint.host_name, path);
        self.dispatch(Verb::Patch, &url, Some(body)).await
    }

    async fn delete(&self, endpoint: &AgentEndpoint, path: &str) -> Result<(), CoreError> {
        let url = format!("{}{}", endpoint.host_name, path);
        self.dispatch(Verb::Delete, &url, None).await.map(|_| ())
    }

    async fn post_event(&self, destination_url: &str, body: &Value) -> Result<(), CoreError> {
        self.dispatch(Verb::Create, destination_url, Some(body)).await.map(|_| ())
    }
}

#[cfg(test)]
pub mod fake {
    //! A transport double used by router/BFS/forwarder tests. Not wired into
    //! the server binary.
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeAgentTransport {
        pub resources: Mutex<HashMap<String, Value>>,
        pub posted_events: Mutex<Vec<(String, Value)>>,
        pub fail_destinations: Mutex<Vec<String>>,
    }

    impl FakeAgentTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed(&self, path: &str, body: Value) {
            self.resources.lock().await.insert(path.to_string(), body);
        }
    }

    #[async_trait]
    impl AgentTransport for FakeAgentTransport {
        async fn get(&self, _endpoint: &AgentEndpoint, path: &str) -> Result<Value, CoreError> {
            self.resources
                .lock()
                .await
                .get(path)
                .cloned()
                .ok_or_else(|| CoreError::ResourceNotFound(path.to_string()))
        }

        async fn create(&self, _endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
            self.resources.lock().await.insert(path.to_string(), body.clone());
            Ok(body.clone())
        }

        async fn replace(&self, _endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
            self.resources.lock().await.insert(path.to_string(), body.clone());
            Ok(body.clone())
        }

        async fn patch(&self, _endpoint: &AgentEndpoint, path: &str, body: &Value) -> Result<Value, CoreError> {
            let mut resources = self.resources.lock().await;
            let entry = resources.entry(path.to_string()).or_insert_with(|| Value::Object(Default::default()));
            crate::store::deep_merge(entry, body);
            Ok(entry.clone())
        }

        async fn delete(&self, _endpoint: &AgentEndpoint, path: &str) -> Result<(), CoreError> {
            self.resources.lock().await.remove(path);
            Ok(())
        }

        async fn post_event(&self, destination_url: &str, body: &Value) -> Result<(), CoreError> {
            if self.fail_destinations.lock().await.contains(&destination_url.to_string()) {
                return Err(CoreError::DestinationError);
            }
            self.posted_events.lock().await.push((destination_url.to_string(), body.clone()));
            Ok(())
        }
    }
}
