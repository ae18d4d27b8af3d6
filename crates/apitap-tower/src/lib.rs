//! # apitap-tower
//!
//! [`tower`] middleware that captures HTTP request/response pairs and
//! hands them to an [`apitap::TelemetryAgent`].
//!
//! The service buffers both bodies (capture needs the bytes, and the
//! agent's codec decides how they go on the wire), forwards the request
//! downstream, and reports the completed pair to the agent after the
//! response is ready. Telemetry never alters the response and performs
//! no network I/O on the request path; delivery happens on the agent's
//! background batch job.
//!
//! To record the client's peer address, insert it into the request
//! extensions as a [`std::net::SocketAddr`] (most server stacks have a
//! connect-info mechanism for this); proxy headers are consulted first
//! either way.
//!
//! ## Example
//!
//! ```ignore
//! use apitap::{AgentConfig, TelemetryAgent};
//! use apitap_tower::TelemetryLayer;
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! let agent = Arc::new(TelemetryAgent::start(AgentConfig::new("app-id")).await?);
//! let service = ServiceBuilder::new()
//!     .layer(TelemetryLayer::new(agent))
//!     .service(my_http_service);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use apitap::{RequestInfo, ResponseInfo, TelemetryAgent};
use bytes::Bytes;
use chrono::Utc;
use http::{Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};

/// Layer that wraps a service with traffic capture.
#[derive(Clone)]
pub struct TelemetryLayer {
    agent: Arc<TelemetryAgent>,
}

impl TelemetryLayer {
    /// Wrap services with capture for the given agent.
    pub fn new(agent: Arc<TelemetryAgent>) -> Self {
        Self { agent }
    }

    /// The agent events are reported to.
    pub fn agent(&self) -> &Arc<TelemetryAgent> {
        &self.agent
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            agent: Arc::clone(&self.agent),
        }
    }
}

/// Service produced by [`TelemetryLayer`].
#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    agent: Arc<TelemetryAgent>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TelemetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let agent = Arc::clone(&self.agent);
        // Swap in the clone so the readied service handles this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let request_time = Utc::now();
            let (parts, body) = request.into_parts();
            let body_bytes = body.collect().await.map_err(Into::into)?.to_bytes();

            let mut request_info =
                RequestInfo::new(parts.method.to_string(), parts.uri.to_string())
                    .with_time(request_time)
                    .with_headers(header_map(&parts.headers))
                    .with_body(body_bytes.clone());
            if let Some(addr) = parts.extensions.get::<SocketAddr>() {
                request_info = request_info.with_remote_addr(addr.ip());
            }

            let downstream = Request::from_parts(parts, Full::new(body_bytes));
            let response = inner.call(downstream).await.map_err(Into::into)?;

            let (parts, body) = response.into_parts();
            let body_bytes = body.collect().await.map_err(Into::into)?.to_bytes();

            let response_info = ResponseInfo::new(parts.status.as_u16())
                .with_headers(header_map(&parts.headers))
                .with_body(body_bytes.clone());

            agent.log_event(request_info, response_info);

            Ok(Response::from_parts(parts, Full::new(body_bytes)))
        })
    }
}

/// Flatten an `http::HeaderMap` for capture; non-UTF-8 values are
/// skipped.
fn header_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
