//! User identification from authorization headers.
//!
//! Used when the host installs no identify-user hook: the configured
//! authorization header is located and its token inspected: bearer JWT
//! payloads, basic credentials, or bare JWT-like tokens. Every failure
//! along the way yields `None`; this path never errors.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use std::collections::HashMap;

/// Resolve a user id from the configured authorization header(s).
///
/// `header_names` is a comma-separated list of candidate header names
/// (case-insensitive); the first one present in `headers` is used.
/// `field` names the JWT payload claim holding the user id.
/// `headers` must have lowercased keys.
pub fn user_id_from_authorization(
    headers: &HashMap<String, String>,
    header_names: &str,
    field: &str,
) -> Option<String> {
    let value = header_names
        .split(',')
        .map(|name| name.trim().to_lowercase())
        .find_map(|name| headers.get(&name))?;

    // Multiple credentials may be folded into one header; the first wins.
    let token = value.split(',').next()?.trim();

    if let Some(rest) = strip_scheme(token, "Bearer") {
        user_id_from_jwt(rest, field)
    } else if let Some(rest) = strip_scheme(token, "Basic") {
        user_id_from_basic(rest)
    } else {
        // No recognized scheme: the whole value may itself be a JWT.
        user_id_from_jwt(token, field)
    }
}

fn strip_scheme<'a>(token: &'a str, scheme: &str) -> Option<&'a str> {
    let pos = token.find(scheme)?;
    Some(token[pos + scheme.len()..].trim())
}

/// Decode the payload segment of a JWT-like token and extract `field`.
///
/// The token is never verified; only the payload is inspected. Claim
/// lookup is case-insensitive.
fn user_id_from_jwt(token: &str, field: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = decode_base64_loose(payload)?;
    let claims: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&decoded).ok()?;
    let (_, value) = claims
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(field))?;
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `Basic` credentials: base64 of `user:password`; the user part wins.
fn user_id_from_basic(token: &str) -> Option<String> {
    let decoded = decode_base64_loose(token)?;
    let credentials = String::from_utf8(decoded).ok()?;
    let user = credentials.split(':').next()?.trim();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

/// Base64 decode tolerant of missing padding and of either alphabet.
fn decode_base64_loose(segment: &str) -> Option<Vec<u8>> {
    let mut normalized = segment.trim().trim_end_matches('=').to_string();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    STANDARD
        .decode(&normalized)
        .or_else(|_| URL_SAFE.decode(&normalized))
        .ok()
}
