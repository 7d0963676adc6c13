//! Error kinds for the aggregation core.
//!
//! Each variant preserves the identity of one of the exception classes in
//! the reference implementation's `sunfish/lib/exceptions.py`, because the
//! HTTP status mapping at the edge depends on matching these identities
//! (see spec §6/§7), not on their message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error("property {0} not found")]
    PropertyNotFound(String),

    #[error("method not allowed for collections")]
    CollectionNotSupported,

    #[error("resource {0} already exists")]
    AlreadyExists(String),

    #[error("action not allowed")]
    ActionNotAllowed,

    #[error("path {0} not valid")]
    InvalidPath(String),

    #[error("illegal collection type at {0}")]
    IllegalCollectionType(String),

    #[error("illegal subscription")]
    IllegalSubscription,

    #[error("cannot reach destination")]
    DestinationError,

    #[error("agent forwarding failure during {operation}: status {status}, {reason}")]
    AgentForwardingFailure {
        operation: String,
        status: i32,
        reason: String,
    },
}

impl CoreError {
    /// Sentinel status used when an agent call times out or the transport
    /// fails outright rather than returning a non-2xx response (spec §5
    /// Timeouts, §4.3 Agent Client).
    pub const TRANSPORT_FAILURE_STATUS: i32 = -1;

    pub fn agent_forwarding(operation: impl Into<String>, status: i32, reason: impl Into<String>) -> Self {
        CoreError::AgentForwardingFailure {
            operation: operation.into(),
            status,
            reason: reason.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
