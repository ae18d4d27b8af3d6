//! Body codec: classify and encode request/response payloads.
//!
//! Payloads that look like JSON are shipped parsed; gzip payloads are
//! decompressed and re-inspected; everything else (and every decode
//! failure) falls back to base64 of the raw bytes. The codec never
//! errors toward the caller.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;

/// Transfer encoding reported for parsed JSON bodies.
pub const ENCODING_JSON: &str = "json";

/// Transfer encoding reported for base64-wrapped bodies.
pub const ENCODING_BASE64: &str = "base64";

/// Classify and encode a body for the wire model.
///
/// Returns the encoded body and its transfer encoding, or `(None, None)`
/// for an empty body. `headers` must already be lowercased (see
/// [`lowercase_headers`]); it is only consulted for `content-encoding`.
pub fn parse_body(
    raw: &[u8],
    headers: Option<&HashMap<String, String>>,
) -> (Option<serde_json::Value>, Option<String>) {
    if raw.is_empty() {
        return (None, None);
    }

    if starts_with_json(raw) {
        match serde_json::from_slice(raw) {
            Ok(value) => return (Some(value), Some(ENCODING_JSON.to_string())),
            Err(_) => return base64_body(raw),
        }
    }

    if is_gzip(headers) {
        let mut decompressed = Vec::new();
        match GzDecoder::new(raw).read_to_end(&mut decompressed) {
            Ok(_) if starts_with_json(&decompressed) => {
                match serde_json::from_slice(&decompressed) {
                    Ok(value) => return (Some(value), Some(ENCODING_JSON.to_string())),
                    // Declared JSON but unparsable: wrap the original bytes.
                    Err(_) => return base64_body(raw),
                }
            }
            Ok(_) => return base64_body(&decompressed),
            Err(_) => return base64_body(raw),
        }
    }

    base64_body(raw)
}

/// Rewrite a header map with lowercased keys.
pub fn lowercase_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}

/// JSON detection: first non-whitespace byte opens an object or array.
fn starts_with_json(body: &[u8]) -> bool {
    matches!(
        body.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

fn is_gzip(headers: Option<&HashMap<String, String>>) -> bool {
    headers
        .and_then(|h| h.get("content-encoding"))
        .map(|v| v.to_lowercase().contains("gzip"))
        .unwrap_or(false)
}

fn base64_body(raw: &[u8]) -> (Option<serde_json::Value>, Option<String>) {
    (
        Some(serde_json::Value::String(STANDARD.encode(raw))),
        Some(ENCODING_BASE64.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gzip_headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("content-encoding".to_string(), "gzip".to_string());
        headers
    }

    #[test]
    fn test_json_body_passthrough() {
        let (body, encoding) = parse_body(b"{\"a\":1}", None);
        assert_eq!(body.unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(encoding.as_deref(), Some("json"));
    }

    #[test]
    fn test_json_array_with_leading_whitespace() {
        let (body, encoding) = parse_body(b"  [1, 2, 3]", None);
        assert_eq!(body.unwrap(), serde_json::json!([1, 2, 3]));
        assert_eq!(encoding.as_deref(), Some("json"));
    }

    #[test]
    fn test_non_json_body_is_base64() {
        let raw = b"\x00\x01binary payload";
        let (body, encoding) = parse_body(raw, None);
        assert_eq!(
            body.unwrap(),
            serde_json::Value::String(STANDARD.encode(raw))
        );
        assert_eq!(encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn test_malformed_json_falls_back_to_base64() {
        let raw = b"{not json at all";
        let (body, encoding) = parse_body(raw, None);
        assert_eq!(
            body.unwrap(),
            serde_json::Value::String(STANDARD.encode(raw))
        );
        assert_eq!(encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn test_gzip_json_is_decompressed() {
        let compressed = gzip(b"{\"a\":1}");
        let (body, encoding) = parse_body(&compressed, Some(&gzip_headers()));
        assert_eq!(body.unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(encoding.as_deref(), Some("json"));
    }

    #[test]
    fn test_gzip_non_json_is_base64_of_decompressed() {
        let compressed = gzip(b"plain text inside");
        let (body, encoding) = parse_body(&compressed, Some(&gzip_headers()));
        assert_eq!(
            body.unwrap(),
            serde_json::Value::String(STANDARD.encode(b"plain text inside"))
        );
        assert_eq!(encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn test_corrupt_gzip_is_base64_of_original() {
        let raw = b"\x1f\x8b but not really gzip";
        let (body, _) = parse_body(raw, Some(&gzip_headers()));
        assert_eq!(
            body.unwrap(),
            serde_json::Value::String(STANDARD.encode(raw))
        );
    }

    #[test]
    fn test_empty_body() {
        let (body, encoding) = parse_body(b"", None);
        assert!(body.is_none());
        assert!(encoding.is_none());
    }

    #[test]
    fn test_lowercase_headers() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("X-Request-Id".to_string(), "abc".to_string());
        let lowered = lowercase_headers(&headers);
        assert_eq!(lowered.get("content-type").unwrap(), "application/json");
        assert_eq!(lowered.get("x-request-id").unwrap(), "abc");
    }
}
