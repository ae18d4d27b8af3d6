//! # apitap
//!
//! In-process API telemetry agent: observe HTTP request/response pairs,
//! sample them against a remotely-governed configuration, and deliver
//! them to a collector in asynchronous batches without ever blocking
//! or failing the host request path.
//!
//! ## How it fits together
//!
//! - [`TelemetryAgent`] owns the delivery queue, the background batch
//!   job (one drain every two seconds), and the cached sampling
//!   configuration.
//! - [`AgentConfig`] is the builder for everything the host can tune:
//!   application id, batch size, body capture, authorization parsing.
//! - [`AgentHooks`] lets the host attach identity, metadata, skip and
//!   mask logic; every capability is optional.
//! - Integrations hand the agent a captured [`RequestInfo`] /
//!   [`ResponseInfo`] pair; the `apitap-tower` crate does this for
//!   tower/hyper stacks.
//!
//! Delivery is best-effort and at-most-once: a batch that fails to
//! transmit is dropped, and events still queued at shutdown are lost.
//! The host's request path always wins over delivery guarantees.
//!
//! ## Quick start
//!
//! ```ignore
//! use apitap::{AgentConfig, TelemetryAgent, RequestInfo, ResponseInfo};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), apitap::ConfigError> {
//!     let agent = TelemetryAgent::start(AgentConfig::new("app-id")).await?;
//!
//!     // Inside a request handler:
//!     let request = RequestInfo::new("GET", "https://api.example.com/items");
//!     let response = ResponseInfo::new(200);
//!     agent.log_event(request, response);
//!
//!     agent.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod agent;
mod app_config;
mod batcher;

pub mod auth;
pub mod body;
pub mod client;
pub mod client_ip;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod mapper;

pub use agent::TelemetryAgent;
pub use client::{BatchResponse, CollectorApi, ConfigResponse, HttpCollector};
pub use config::AgentConfig;
pub use error::{ConfigError, TransportError, TransportResult};
pub use event::{CompanyProfile, Event, EventRequest, EventResponse, UserProfile};
pub use hooks::{AgentHooks, NoopHooks};
pub use mapper::{RequestInfo, ResponseInfo};
