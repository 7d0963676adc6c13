//! Aggregation engine for a Redfish fabric aggregator: ownership routing,
//! BFS resource ingestion, cross-agent alias/boundary resolution and event
//! fan-out, independent of any particular HTTP transport.

pub mod agent_client;
pub mod alias;
pub mod alias_link;
pub mod bfs;
pub mod boundary;
pub mod config;
pub mod error;
pub mod event_handlers;
pub mod facade;
pub mod forwarder;
pub mod model;
pub mod object_handlers;
pub mod router;
pub mod store;
pub mod subscriptions;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use facade::CoreFacade;
