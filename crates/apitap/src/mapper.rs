//! Event mapping: from a captured request/response pair to the wire model.

use crate::auth;
use crate::body::{lowercase_headers, parse_body};
use crate::client_ip::get_client_ip;
use crate::config::AgentConfig;
use crate::event::{Event, EventRequest, EventResponse};
use crate::hooks::guarded;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// A captured request, as handed to the agent by an integration.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Time the request was received.
    pub time: DateTime<Utc>,

    /// HTTP method.
    pub method: String,

    /// Full request URI.
    pub uri: String,

    /// Request headers as received (any casing).
    pub headers: HashMap<String, String>,

    /// Raw request body.
    pub body: Bytes,

    /// Peer address of the connection, if known.
    pub remote_addr: Option<IpAddr>,
}

impl RequestInfo {
    /// Create a captured request stamped with the current time.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            method: method.into(),
            uri: uri.into(),
            headers: HashMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// Override the capture time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Set the request headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the raw request body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Set the connection peer address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// A captured response, as handed to the agent by an integration.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// Time the response was produced.
    pub time: DateTime<Utc>,

    /// HTTP status code.
    pub status: u16,

    /// Response headers as sent (any casing).
    pub headers: HashMap<String, String>,

    /// Raw response body.
    pub body: Bytes,
}

impl ResponseInfo {
    /// Create a captured response stamped with the current time.
    pub fn new(status: u16) -> Self {
        Self {
            time: Utc::now(),
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Override the capture time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Set the response headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the raw response body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// Composes [`Event`]s from captured pairs, identity hooks, and the
/// body codec.
pub(crate) struct EventMapper {
    config: Arc<AgentConfig>,
}

impl EventMapper {
    pub(crate) fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    /// Build the full event for a captured pair.
    ///
    /// Identity hooks run individually guarded: one misbehaving hook
    /// costs only its own field.
    pub(crate) fn to_event(&self, request: &RequestInfo, response: &ResponseInfo) -> Event {
        let hooks = &self.config.hooks;

        let event_request = self.to_request(request);
        let event_response = self.to_response(response);

        let user_id = guarded("identify_user", None, || {
            hooks.user_id(request, response)
        })
        .or_else(|| {
            auth::user_id_from_authorization(
                &event_request.headers,
                &self.config.authorization_header_name,
                &self.config.authorization_user_id_field,
            )
        });
        let company_id = guarded("identify_company", None, || {
            hooks.company_id(request, response)
        });
        let session_token = guarded("get_session_token", None, || {
            hooks.session_token(request, response)
        });
        let metadata = guarded("get_metadata", None, || hooks.metadata(request, response));

        Event::new(event_request, event_response)
            .with_user_id(user_id)
            .with_company_id(company_id)
            .with_session_token(session_token)
            .with_metadata(metadata)
    }

    fn to_request(&self, info: &RequestInfo) -> EventRequest {
        let headers = lowercase_headers(&info.headers);
        let (body, transfer_encoding) = if self.config.log_body {
            parse_body(&info.body, Some(&headers))
        } else {
            (None, None)
        };
        let api_version = guarded("api_version", None, || {
            self.config.hooks.api_version(info)
        })
        .or_else(|| self.config.api_version.clone());

        EventRequest {
            time: info.time,
            uri: info.uri.clone(),
            verb: info.method.clone(),
            api_version,
            ip_address: get_client_ip(&headers, info.remote_addr),
            headers,
            body,
            transfer_encoding,
        }
    }

    fn to_response(&self, info: &ResponseInfo) -> EventResponse {
        let headers = lowercase_headers(&info.headers);
        let (body, transfer_encoding) = if self.config.log_body {
            parse_body(&info.body, Some(&headers))
        } else {
            (None, None)
        };

        EventResponse {
            time: info.time,
            status: info.status,
            headers,
            body,
            transfer_encoding,
        }
    }
}
