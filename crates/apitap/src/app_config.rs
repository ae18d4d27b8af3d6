//! Remote sampling configuration.
//!
//! The collector governs sampling through a versioned configuration
//! blob. The manager caches the last good parse and refreshes it when
//! the batch sender observes a new version token, never more than once
//! per cooldown window. Request-path reads take a shared lock only; the
//! background drain task is the sole writer.

use crate::client::{CollectorApi, ConfigResponse};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Minimum spacing between configuration refreshes.
const REFRESH_COOLDOWN_MINUTES: i64 = 5;

/// Sampling rules as delivered by the collector.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SamplingRules {
    /// Default sampling percentage, 0–100.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Per-user overrides.
    #[serde(default)]
    pub user_sample_rate: HashMap<String, u32>,

    /// Per-company overrides.
    #[serde(default)]
    pub company_sample_rate: HashMap<String, u32>,
}

fn default_sample_rate() -> u32 {
    100
}

impl Default for SamplingRules {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            user_sample_rate: HashMap::new(),
            company_sample_rate: HashMap::new(),
        }
    }
}

struct ConfigState {
    etag: Option<String>,
    rules: SamplingRules,
    last_updated: DateTime<Utc>,
}

/// Caches the remote configuration and applies the refresh gate.
pub(crate) struct ConfigManager {
    state: RwLock<ConfigState>,
}

impl ConfigManager {
    /// Start with defaults: sample everything until the first fetch.
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ConfigState {
                etag: None,
                rules: SamplingRules::default(),
                last_updated: Utc::now(),
            }),
        }
    }

    /// Startup fetch. A failure leaves the defaults in effect.
    pub(crate) async fn load_initial(&self, client: &dyn CollectorApi) {
        match client.get_config().await {
            Ok(response) => self.install(response),
            Err(error) => {
                tracing::debug!(%error, "initial configuration fetch failed; sampling at 100%");
            }
        }
    }

    /// Resolve the sampling percentage for one event's identity.
    ///
    /// Company overrides beat user overrides beat the default. The
    /// result is recomputed per event, never cached across events.
    pub(crate) fn sampling_percentage(
        &self,
        user_id: Option<&str>,
        company_id: Option<&str>,
    ) -> u32 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let rules = &state.rules;
        let rate = company_id
            .and_then(|id| rules.company_sample_rate.get(id))
            .or_else(|| user_id.and_then(|id| rules.user_sample_rate.get(id)))
            .copied()
            .unwrap_or(rules.sample_rate);
        rate.min(100)
    }

    /// Listener for batch-run results: applies the refresh gate and, if
    /// it passes, refetches the configuration.
    ///
    /// Only the background drain task calls this, so writes are
    /// single-writer by construction.
    pub(crate) async fn on_batch_result(&self, etag: Option<String>, client: &dyn CollectorApi) {
        let Some(new_etag) = etag else { return };

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if !should_refresh(
                state.etag.as_deref(),
                &new_etag,
                state.last_updated,
                Utc::now(),
            ) {
                return;
            }
        }

        match client.get_config().await {
            Ok(response) => {
                self.install(response);
                tracing::debug!(etag = %new_etag, "refreshed sampling configuration");
            }
            Err(error) => {
                tracing::debug!(%error, "configuration refresh failed; keeping previous rules");
            }
        }
    }

    /// Parse and install a fetched configuration.
    ///
    /// A malformed blob keeps the version token but falls back to the
    /// default rules.
    fn install(&self, response: ConfigResponse) {
        let rules = match serde_json::from_value::<SamplingRules>(response.body.clone()) {
            Ok(rules) => rules,
            Err(error) => {
                tracing::debug!(%error, "unparsable sampling configuration; using defaults");
                SamplingRules::default()
            }
        };
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.etag = response.etag;
        state.rules = rules;
        state.last_updated = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn cached_etag(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).etag.clone()
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_updated(&self, minutes: i64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_updated = Utc::now() - Duration::minutes(minutes);
    }
}

/// The four-way refresh gate: a refresh fires iff the collector
/// reported a version, we have a cached version, they differ, and the
/// cooldown has elapsed.
fn should_refresh(
    cached_etag: Option<&str>,
    new_etag: &str,
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match cached_etag {
        Some(cached) => {
            cached != new_etag && now > last_updated + Duration::minutes(REFRESH_COOLDOWN_MINUTES)
        }
        None => false,
    }
}
