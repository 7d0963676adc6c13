//! Object Handler Table: per-resource-type hooks invoked after a local CRUD
//! step lands (spec §4.1 step 6, §9). Grounded on
//! `examples/original_source/sunfish_plugins/objects_handlers/sunfish_server/redfish_object_handler.py`,
//! whose dispatch table keys on the leading `@odata.type` token and silently
//! no-ops for any type without a registered handler.

use crate::error::CoreResult;
use crate::model::Verb;
use crate::subscriptions::SubscriptionIndex;
use serde_json::Value;
use tracing::{debug, warn};

/// Drives `SubscriptionIndex` off the `EventDestination` CRUD lifecycle: a
/// create/replace/patch (re)indexes the subscription, a delete removes it
/// (reference `RedfishObjectHandlersTable.EventDestination`).
pub async fn dispatch(
    subscriptions: &SubscriptionIndex,
    object_type: &str,
    path: &str,
    verb: Verb,
    payload: Option<&Value>,
) -> CoreResult<()> {
    match object_type {
        "EventDestination" => handle_event_destination(subscriptions, path, verb, payload).await,
        _ => {
            debug!(object_type, "no object handler registered for this resource type");
            Ok(())
        }
    }
}

/// Validates then indexes a subscription payload. The validator is a
/// warning gate, not a persistence gate (spec §4.5/§7): the subscription is
/// indexed either way, but an invalid one still surfaces `IllegalSubscription`
/// to the caller after the object has already been committed to the store,
/// the same way every other already-applied local write is never rolled
/// back on a later failure (spec §5 Cancellation).
async fn validate_and_index(subscriptions: &SubscriptionIndex, path: &str, payload: &Value) -> CoreResult<()> {
    let validation = crate::subscriptions::SubscriptionIndex::validate(payload);
    subscriptions.index_subscription(path, payload).await;
    if let Err(err) = &validation {
        warn!(path, "subscription fails disjointness validation, indexed anyway: {err}");
    }
    validation
}

async fn handle_event_destination(
    subscriptions: &SubscriptionIndex,
    path: &str,
    verb: Verb,
    payload: Option<&Value>,
) -> CoreResult<()> {
    match verb {
        Verb::Create => {
            if let Some(payload) = payload {
                validate_and_index(subscriptions, path, payload).await?;
            }
        }
        Verb::Replace | Verb::Patch => {
            subscriptions.remove_subscription(path).await;
            if let Some(payload) = payload {
                validate_and_index(subscriptions, path, payload).await?;
            }
        }
        Verb::Delete => {
            subscriptions.remove_subscription(path).await;
        }
        Verb::Get => {}
    }
    Ok(())
}
