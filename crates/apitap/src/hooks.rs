//! Host integration hooks.
//!
//! The host supplies identity and policy through a single trait with
//! optional capability methods; every method has a no-op default, so a
//! host implements only what it needs. Hook invocations are isolated:
//! a panicking hook costs its own field, never the event or the request.

use crate::event::Event;
use crate::mapper::{RequestInfo, ResponseInfo};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Capabilities a host can plug into the agent.
///
/// All methods default to "no value" / "no opinion". Returning `None`
/// from an identity method means the agent falls back to its own
/// resolution (authorization-header parsing for the user id, nothing
/// for the rest).
pub trait AgentHooks: Send + Sync + 'static {
    /// Identify the user behind this request/response pair.
    fn user_id(&self, _request: &RequestInfo, _response: &ResponseInfo) -> Option<String> {
        None
    }

    /// Identify the company behind this request/response pair.
    fn company_id(&self, _request: &RequestInfo, _response: &ResponseInfo) -> Option<String> {
        None
    }

    /// Extract a session token for this request/response pair.
    fn session_token(&self, _request: &RequestInfo, _response: &ResponseInfo) -> Option<String> {
        None
    }

    /// Attach free-form metadata to the event.
    fn metadata(
        &self,
        _request: &RequestInfo,
        _response: &ResponseInfo,
    ) -> Option<serde_json::Value> {
        None
    }

    /// Report the API version for this request.
    fn api_version(&self, _request: &RequestInfo) -> Option<String> {
        None
    }

    /// Decide whether this request should be skipped entirely.
    fn skip(&self, _request: &RequestInfo) -> bool {
        false
    }

    /// Rewrite the event before it is queued, e.g. to scrub fields.
    ///
    /// Returning `None` drops the event.
    fn mask(&self, event: Event) -> Option<Event> {
        Some(event)
    }
}

/// The hookless default: capture everything, identify nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl AgentHooks for NoopHooks {}

/// Run one hook, converting a panic into the given fallback value.
pub(crate) fn guarded<T>(hook: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(hook, "host hook panicked; substituting no-op value");
            fallback
        }
    }
}
