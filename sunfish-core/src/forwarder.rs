//! Event Forwarder (spec §4.4): given an event that has already run through
//! the Event Handler Table, computes its subscriber set from the
//! Subscription Index and posts it to each one.
//!
//! Grounded on `RedfishEventHandler.forward_event` in
//! `examples/original_source/sunfish_plugins/events_handlers/redfish/redfish_event_handler.py`,
//! which reads each subscriber's `EventDestination` and POSTs the envelope
//! to its `Destination`, dropping (rather than failing the whole forward on)
//! any subscriber whose destination is unreachable.

use crate::agent_client::AgentTransport;
use crate::error::{CoreError, CoreResult};
use crate::model::resource_type_of;
use crate::store::ResourceStore;
use crate::subscriptions::SubscriptionIndex;
use serde_json::Value;
use tracing::warn;

/// Resolves the subscriber set for one event record and POSTs `envelope` to
/// each subscriber's `Destination`. Returns the ids of subscribers actually
/// notified -- a subscriber whose destination errors or disconnects is
/// dropped (logged), not propagated as a forwarding failure (spec §7
/// "per-subscriber HTTP failures... absorbed, not raised").
pub async fn forward_event(
    store: &dyn ResourceStore,
    subscriptions: &SubscriptionIndex,
    transport: &dyn AgentTransport,
    message_id: &str,
    origin_of_condition: Option<&str>,
    envelope: &Value,
) -> CoreResult<Vec<String>> {
    let origin_type = match origin_of_condition {
        Some(origin) => match store.read(origin).await {
            Ok(resource) => resource_type_of(&resource),
            Err(_) => None,
        },
        None => None,
    };

    let subscriber_ids = subscriptions
        .subscribers_for(message_id, origin_of_condition, origin_type.as_deref())
        .await;

    let mut notified = Vec::new();
    for subscriber_id in subscriber_ids {
        let destination = match store.read(&subscriber_id).await {
            Ok(resource) => resource.get("Destination").and_then(Value::as_str).map(str::to_string),
            Err(_) => None,
        };
        let Some(destination) = destination else {
            warn!(subscriber = %subscriber_id, "subscriber has no Destination, dropping from forward");
            continue;
        };

        match transport.post_event(&destination, envelope).await {
            Ok(()) => notified.push(subscriber_id),
            Err(CoreError::DestinationError) | Err(CoreError::AgentForwardingFailure { .. }) => {
                warn!(subscriber = %subscriber_id, destination, "could not reach subscriber destination, dropping");
            }
            Err(other) => return Err(other),
        }
    }

    Ok(notified)
}
