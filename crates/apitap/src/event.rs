//! Wire model for captured traffic events.
//!
//! An [`Event`] is the normalized record of one request/response pair.
//! It is immutable once enqueued: the agent builds it, attaches identity
//! and weight, and hands ownership to the delivery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Traffic direction reported for server-side captures.
pub const DIRECTION_INCOMING: &str = "Incoming";

/// The request half of a captured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    /// Time the request was received.
    pub time: DateTime<Utc>,

    /// Full request URI.
    pub uri: String,

    /// HTTP method.
    pub verb: String,

    /// API version reported by the host, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Resolved client IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Request headers, lowercased keys.
    pub headers: HashMap<String, String>,

    /// Request body: parsed JSON, or a base64 string for opaque payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// How `body` is encoded: `"json"` or `"base64"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<String>,
}

/// The response half of a captured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    /// Time the response was produced.
    pub time: DateTime<Utc>,

    /// HTTP status code.
    pub status: u16,

    /// Response headers, lowercased keys.
    pub headers: HashMap<String, String>,

    /// Response body, same encoding rules as the request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// How `body` is encoded: `"json"` or `"base64"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<String>,
}

/// A normalized request/response pair queued for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Captured request.
    pub request: EventRequest,

    /// Captured response.
    pub response: EventResponse,

    /// User identity resolved for this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Company identity resolved for this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,

    /// Session token resolved for this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Free-form metadata supplied by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Traffic direction; always [`DIRECTION_INCOMING`] for this agent.
    pub direction: String,

    /// Sampling weight: how many real requests this event stands for.
    pub weight: u32,
}

impl Event {
    /// Create an event from its two halves with no identity attached.
    pub fn new(request: EventRequest, response: EventResponse) -> Self {
        Self {
            request,
            response,
            user_id: None,
            company_id: None,
            session_token: None,
            metadata: None,
            direction: DIRECTION_INCOMING.to_string(),
            weight: 1,
        }
    }

    /// Set the user identity.
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set the company identity.
    pub fn with_company_id(mut self, company_id: Option<String>) -> Self {
        self.company_id = company_id;
        self
    }

    /// Set the session token.
    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }

    /// Set the host-supplied metadata.
    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Compute the sampling weight for an event captured at the given
/// sampling percentage.
///
/// A weight of `w` means the event stands for roughly `w` requests once
/// the dropped ones are accounted for. A percentage of zero yields a
/// weight of one: such events only exist when sampling was bypassed.
pub fn event_weight(sampling_percentage: u32) -> u32 {
    if sampling_percentage == 0 {
        1
    } else {
        100 / sampling_percentage.min(100)
    }
}

/// A user profile pushed to the collector out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identifier of the user. Required by the collector.
    pub user_id: String,

    /// Company the user belongs to, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,

    /// Free-form profile attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UserProfile {
    /// Create a profile for the given user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: None,
            metadata: None,
        }
    }

    /// Attach a company id.
    pub fn with_company_id(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A company profile pushed to the collector out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    /// Identifier of the company. Required by the collector.
    pub company_id: String,

    /// Primary domain of the company, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_domain: Option<String>,

    /// Free-form profile attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CompanyProfile {
    /// Create a profile for the given company id.
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            company_domain: None,
            metadata: None,
        }
    }

    /// Attach the company domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.company_domain = Some(domain.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
