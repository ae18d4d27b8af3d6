//! The telemetry agent façade.
//!
//! One agent instance owns the delivery queue, the background batch
//! job, and the cached sampling configuration. Hosts hand it captured
//! request/response pairs; everything downstream of that call is
//! best-effort and invisible to the request path.

use crate::app_config::ConfigManager;
use crate::auth;
use crate::batcher::EventBatcher;
use crate::body::lowercase_headers;
use crate::client::{CollectorApi, HttpCollector};
use crate::config::AgentConfig;
use crate::error::ConfigError;
use crate::event::{event_weight, CompanyProfile, UserProfile};
use crate::hooks::guarded;
use crate::mapper::{EventMapper, RequestInfo, ResponseInfo};
use std::sync::Arc;

/// An in-process telemetry agent bound to one application id.
///
/// ```ignore
/// use apitap::{AgentConfig, TelemetryAgent};
///
/// let agent = TelemetryAgent::start(AgentConfig::new("app-id")).await?;
/// // hand captured pairs to `agent.log_event(...)` from the middleware
/// ```
pub struct TelemetryAgent {
    config: Arc<AgentConfig>,
    mapper: EventMapper,
    client: Arc<dyn CollectorApi>,
    config_manager: Arc<ConfigManager>,
    batcher: EventBatcher,
}

impl TelemetryAgent {
    /// Build an agent against the default collector transport and fetch
    /// the initial sampling configuration.
    pub async fn start(config: AgentConfig) -> Result<Self, ConfigError> {
        validate(&config)?;
        let collector = HttpCollector::new(&config)?;
        Self::with_collector(config, Arc::new(collector)).await
    }

    /// Build an agent over a custom [`CollectorApi`] implementation.
    pub async fn with_collector(
        config: AgentConfig,
        client: Arc<dyn CollectorApi>,
    ) -> Result<Self, ConfigError> {
        validate(&config)?;
        let config = Arc::new(config);
        let config_manager = Arc::new(ConfigManager::new());
        config_manager.load_initial(client.as_ref()).await;
        let batcher = EventBatcher::new(
            config.batch_size,
            Arc::clone(&client),
            Arc::clone(&config_manager),
        );
        Ok(Self {
            mapper: EventMapper::new(Arc::clone(&config)),
            config,
            client,
            config_manager,
            batcher,
        })
    }

    /// Record one request/response pair.
    ///
    /// Applies the skip hook, draws against the sampling percentage for
    /// this pair's identity, maps and masks the event, and queues it for
    /// delivery. Never blocks, never errors, never performs network I/O.
    pub fn log_event(&self, request: RequestInfo, response: ResponseInfo) {
        let hooks = &self.config.hooks;

        if guarded("skip", false, || hooks.skip(&request)) {
            tracing::trace!(uri = %request.uri, "event skipped by host skip hook");
            return;
        }

        let lowered = lowercase_headers(&request.headers);
        let user_id = guarded("identify_user", None, || {
            hooks.user_id(&request, &response)
        })
        .or_else(|| {
            auth::user_id_from_authorization(
                &lowered,
                &self.config.authorization_header_name,
                &self.config.authorization_user_id_field,
            )
        });
        let company_id = guarded("identify_company", None, || {
            hooks.company_id(&request, &response)
        });

        let percentage = self
            .config_manager
            .sampling_percentage(user_id.as_deref(), company_id.as_deref());
        let draw = rand::random::<f64>() * 100.0;
        if !is_sampled(percentage, draw) {
            tracing::trace!(percentage, draw, "event skipped by sampling");
            return;
        }

        let event = self.mapper.to_event(&request, &response);
        let fallback = event.clone();
        let masked = guarded("mask_event", Some(fallback), move || {
            self.config.hooks.mask(event)
        });
        let Some(mut event) = masked else {
            tracing::debug!("event dropped by mask hook");
            return;
        };
        event.weight = event_weight(percentage);

        self.batcher.ensure_scheduled();
        self.batcher.enqueue(event);
    }

    /// Push a user profile to the collector. Fire-and-log.
    pub async fn update_user(&self, user: UserProfile) {
        if let Err(error) = self.client.update_user(&user).await {
            tracing::warn!(%error, user_id = %user.user_id, "failed to update user profile");
        }
    }

    /// Push a batch of user profiles to the collector. Fire-and-log.
    pub async fn update_users_batch(&self, users: Vec<UserProfile>) {
        if let Err(error) = self.client.update_users_batch(&users).await {
            tracing::warn!(%error, count = users.len(), "failed to update user profiles");
        }
    }

    /// Push a company profile to the collector. Fire-and-log.
    pub async fn update_company(&self, company: CompanyProfile) {
        if let Err(error) = self.client.update_company(&company).await {
            tracing::warn!(%error, company_id = %company.company_id, "failed to update company profile");
        }
    }

    /// Push a batch of company profiles to the collector. Fire-and-log.
    pub async fn update_companies_batch(&self, companies: Vec<CompanyProfile>) {
        if let Err(error) = self.client.update_companies_batch(&companies).await {
            tracing::warn!(%error, count = companies.len(), "failed to update company profiles");
        }
    }

    /// Cancel the background job. Events still queued are lost; this is
    /// the documented shutdown trade-off.
    pub fn stop(&self) {
        self.batcher.stop();
    }

    /// The configuration this agent was built with.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl Drop for TelemetryAgent {
    fn drop(&mut self) {
        // Best-effort exit hook; `stop` is still the explicit API.
        self.batcher.stop();
    }
}

fn validate(config: &AgentConfig) -> Result<(), ConfigError> {
    if config.application_id.trim().is_empty() {
        return Err(ConfigError::MissingApplicationId);
    }
    Ok(())
}

/// The sampling decision: an event survives iff its percentage beats
/// the uniform draw from `[0, 100)`.
fn is_sampled(percentage: u32, draw: f64) -> bool {
    percentage as f64 > draw
}


#[cfg(test)]
mod property_tests {
    use super::is_sampled;
    use crate::event::event_weight;
    use proptest::prelude::*;

    proptest! {
        /// An event is sampled iff its percentage beats the draw.
        #[test]
        fn prop_sampling_decision(percentage in 0u32..=100, draw in 0f64..100.0) {
            prop_assert_eq!(is_sampled(percentage, draw), (percentage as f64) > draw);
        }

        /// Full sampling captures every draw; zero sampling captures none.
        #[test]
        fn prop_sampling_extremes(draw in 0f64..100.0) {
            prop_assert!(is_sampled(100, draw));
            prop_assert!(!is_sampled(0, draw));
        }

        /// Weight compensates for dropped events: floor(100 / percentage),
        /// with the zero-percentage escape hatch pinned to one.
        #[test]
        fn prop_weight_invariant(percentage in 0u32..=100) {
            let weight = event_weight(percentage);
            if percentage == 0 {
                prop_assert_eq!(weight, 1);
            } else {
                prop_assert_eq!(weight, (100.0 / percentage as f64).floor() as u32);
            }
        }

        /// Weight never goes below one.
        #[test]
        fn prop_weight_positive(percentage in 0u32..=100) {
            prop_assert!(event_weight(percentage) >= 1);
        }
    }
}
