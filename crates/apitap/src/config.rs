//! Agent configuration.
//!
//! Builder-pattern configuration for the telemetry agent. The only
//! required value is the application id; everything else has a default
//! matching the collector's expectations.

use crate::hooks::{AgentHooks, NoopHooks};
use std::sync::Arc;

/// Default collector endpoint.
pub(crate) const DEFAULT_BASE_URI: &str = "https://collector.apitap.dev";

/// Default number of events drained per batch.
pub(crate) const DEFAULT_BATCH_SIZE: usize = 25;

/// Default authorization header candidates (comma-separated).
const DEFAULT_AUTHORIZATION_HEADER: &str = "authorization";

/// Default JWT claim holding the user id.
const DEFAULT_USER_ID_FIELD: &str = "sub";

/// Configuration for a [`TelemetryAgent`](crate::TelemetryAgent).
///
/// ```ignore
/// use apitap::AgentConfig;
///
/// let config = AgentConfig::new("app-id-from-dashboard")
///     .batch_size(50)
///     .log_body(false)
///     .api_version("v2");
/// ```
#[derive(Clone)]
pub struct AgentConfig {
    /// Application id issued by the collector. Required.
    pub(crate) application_id: String,

    /// Debug mode: honors the base-uri override.
    pub(crate) debug: bool,

    /// Static API version stamped on every request half.
    pub(crate) api_version: Option<String>,

    /// Whether request/response bodies are captured. Default: true.
    pub(crate) log_body: bool,

    /// Events drained per batch run. Default: 25.
    pub(crate) batch_size: usize,

    /// Collector endpoint override, honored only in debug mode.
    pub(crate) base_uri: Option<String>,

    /// Comma-separated candidate authorization header names.
    pub(crate) authorization_header_name: String,

    /// JWT claim to read the user id from. Default: `sub`.
    pub(crate) authorization_user_id_field: String,

    /// Host hooks. Default: [`NoopHooks`].
    pub(crate) hooks: Arc<dyn AgentHooks>,
}

impl AgentConfig {
    /// Create a configuration for the given application id.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            debug: false,
            api_version: None,
            log_body: true,
            batch_size: DEFAULT_BATCH_SIZE,
            base_uri: None,
            authorization_header_name: DEFAULT_AUTHORIZATION_HEADER.to_string(),
            authorization_user_id_field: DEFAULT_USER_ID_FIELD.to_string(),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Enable debug mode.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set a static API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Enable or disable body capture.
    pub fn log_body(mut self, log_body: bool) -> Self {
        self.log_body = log_body;
        self
    }

    /// Set the batch size (minimum 1).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Override the collector endpoint. Only honored in debug mode.
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    /// Set the authorization header candidates (comma-separated,
    /// case-insensitive).
    pub fn authorization_header_name(mut self, names: impl Into<String>) -> Self {
        self.authorization_header_name = names.into();
        self
    }

    /// Set the JWT claim the user id is read from.
    pub fn authorization_user_id_field(mut self, field: impl Into<String>) -> Self {
        self.authorization_user_id_field = field.into();
        self
    }

    /// Install host hooks.
    pub fn hooks(mut self, hooks: impl AgentHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// The collector endpoint in effect for this configuration.
    pub(crate) fn collector_uri(&self) -> &str {
        if self.debug {
            self.base_uri.as_deref().unwrap_or(DEFAULT_BASE_URI)
        } else {
            DEFAULT_BASE_URI
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("application_id", &self.application_id)
            .field("debug", &self.debug)
            .field("api_version", &self.api_version)
            .field("log_body", &self.log_body)
            .field("batch_size", &self.batch_size)
            .field("base_uri", &self.base_uri)
            .field("authorization_header_name", &self.authorization_header_name)
            .field(
                "authorization_user_id_field",
                &self.authorization_user_id_field,
            )
            .finish()
    }
}
