//! Collector transport.
//!
//! [`CollectorApi`] is the boundary between the agent and the wire: the
//! batch-create call, the configuration fetch, and the out-of-band
//! profile updates. [`HttpCollector`] is the production implementation.

use crate::config::AgentConfig;
use crate::error::{ConfigError, TransportResult, TransportError};
use crate::event::{CompanyProfile, Event, UserProfile};
use async_trait::async_trait;
use std::time::Duration;

/// User agent reported to the collector.
const AGENT_VERSION: &str = concat!("apitap-rust/", env!("CARGO_PKG_VERSION"));

/// Header carrying the application id on every call.
const APPLICATION_ID_HEADER: &str = "x-application-id";

/// Response header carrying the active configuration version.
const CONFIG_ETAG_HEADER: &str = "x-config-etag";

/// Request timeout for collector calls. Only the background task ever
/// waits on this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a batch-create call.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// Configuration version the collector had while ingesting the
    /// batch; drives the refresh gate.
    pub config_etag: Option<String>,
}

/// Result of a configuration fetch.
#[derive(Debug, Clone)]
pub struct ConfigResponse {
    /// Version token of the returned configuration.
    pub etag: Option<String>,

    /// Raw configuration blob.
    pub body: serde_json::Value,
}

/// Calls the agent makes against the collector service.
///
/// Implement this to point the agent at a custom transport (tests use
/// an in-memory recorder).
#[async_trait]
pub trait CollectorApi: Send + Sync + 'static {
    /// Deliver one ordered batch of events.
    async fn create_events_batch(&self, events: &[Event]) -> TransportResult<BatchResponse>;

    /// Fetch the current sampling/governance configuration.
    async fn get_config(&self) -> TransportResult<ConfigResponse>;

    /// Upsert a single user profile.
    async fn update_user(&self, user: &UserProfile) -> TransportResult<()>;

    /// Upsert a batch of user profiles.
    async fn update_users_batch(&self, users: &[UserProfile]) -> TransportResult<()>;

    /// Upsert a single company profile.
    async fn update_company(&self, company: &CompanyProfile) -> TransportResult<()>;

    /// Upsert a batch of company profiles.
    async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> TransportResult<()>;
}

/// HTTP implementation of [`CollectorApi`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    base_uri: String,
    application_id: String,
}

impl HttpCollector {
    /// Build the transport for the given agent configuration.
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        let base_uri = config.collector_uri().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_uri)
            .map_err(|_| ConfigError::InvalidBaseUri(base_uri.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(AGENT_VERSION)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_uri,
            application_id: config.application_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> TransportResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header(APPLICATION_ID_HEADER, &self.application_id)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

fn etag_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONFIG_ETAG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[async_trait]
impl CollectorApi for HttpCollector {
    async fn create_events_batch(&self, events: &[Event]) -> TransportResult<BatchResponse> {
        let response = self.post_json("/v1/events/batch", events).await?;
        Ok(BatchResponse {
            config_etag: etag_header(&response),
        })
    }

    async fn get_config(&self) -> TransportResult<ConfigResponse> {
        let response = self
            .client
            .get(self.url("/v1/config"))
            .header(APPLICATION_ID_HEADER, &self.application_id)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let etag = etag_header(&response);
        let body = response.json().await?;
        Ok(ConfigResponse { etag, body })
    }

    async fn update_user(&self, user: &UserProfile) -> TransportResult<()> {
        self.post_json("/v1/users", user).await?;
        Ok(())
    }

    async fn update_users_batch(&self, users: &[UserProfile]) -> TransportResult<()> {
        self.post_json("/v1/users/batch", users).await?;
        Ok(())
    }

    async fn update_company(&self, company: &CompanyProfile) -> TransportResult<()> {
        self.post_json("/v1/companies", company).await?;
        Ok(())
    }

    async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> TransportResult<()> {
        self.post_json("/v1/companies/batch", companies).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory collector: records batches, serves scripted configs.
    #[derive(Default)]
    pub(crate) struct MockCollector {
        pub batches: Mutex<Vec<Vec<Event>>>,
        pub batch_etag: Mutex<Option<String>>,
        pub fail_batches: AtomicBool,
        pub config_responses: Mutex<VecDeque<ConfigResponse>>,
        pub config_fetches: AtomicUsize,
        pub user_updates: AtomicUsize,
        pub company_updates: AtomicUsize,
    }

    impl MockCollector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_config(&self, etag: Option<&str>, body: serde_json::Value) {
            self.config_responses
                .lock()
                .unwrap()
                .push_back(ConfigResponse {
                    etag: etag.map(|e| e.to_string()),
                    body,
                });
        }

        pub fn set_batch_etag(&self, etag: Option<&str>) {
            *self.batch_etag.lock().unwrap() = etag.map(|e| e.to_string());
        }

        pub fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(|b| b.len()).collect()
        }
    }

    #[async_trait]
    impl CollectorApi for MockCollector {
        async fn create_events_batch(&self, events: &[Event]) -> TransportResult<BatchResponse> {
            if self.fail_batches.load(Ordering::SeqCst) {
                return Err(TransportError::Status(503));
            }
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(BatchResponse {
                config_etag: self.batch_etag.lock().unwrap().clone(),
            })
        }

        async fn get_config(&self) -> TransportResult<ConfigResponse> {
            self.config_fetches.fetch_add(1, Ordering::SeqCst);
            match self.config_responses.lock().unwrap().pop_front() {
                Some(response) => Ok(response),
                None => Err(TransportError::Status(404)),
            }
        }

        async fn update_user(&self, _user: &UserProfile) -> TransportResult<()> {
            self.user_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_users_batch(&self, users: &[UserProfile]) -> TransportResult<()> {
            self.user_updates.fetch_add(users.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn update_company(&self, _company: &CompanyProfile) -> TransportResult<()> {
            self.company_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_companies_batch(
            &self,
            companies: &[CompanyProfile],
        ) -> TransportResult<()> {
            self.company_updates
                .fetch_add(companies.len(), Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_uri() {
        let config = AgentConfig::new("app").debug(true).base_uri("not a uri");
        assert!(matches!(
            HttpCollector::new(&config),
            Err(ConfigError::InvalidBaseUri(_))
        ));
    }

    #[test]
    fn test_url_joining_strips_trailing_slash() {
        let config = AgentConfig::new("app")
            .debug(true)
            .base_uri("http://localhost:8900/");
        let collector = HttpCollector::new(&config).unwrap();
        assert_eq!(
            collector.url("/v1/events/batch"),
            "http://localhost:8900/v1/events/batch"
        );
    }

    #[test]
    fn test_default_endpoint_without_debug() {
        let config = AgentConfig::new("app").base_uri("http://localhost:8900");
        let collector = HttpCollector::new(&config).unwrap();
        assert_eq!(collector.url("/v1/config"), format!("{}/v1/config", crate::config::DEFAULT_BASE_URI));
    }
}
