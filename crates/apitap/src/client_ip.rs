//! Client IP resolution from proxy headers.
//!
//! Proxies and load balancers record the originating client address in a
//! zoo of headers; this walks them in a fixed precedence order and falls
//! back to the peer address of the connection.

use std::collections::HashMap;
use std::net::IpAddr;

/// Headers checked verbatim, in order, after the two special cases.
const SINGLE_VALUE_HEADERS: [&str; 7] = [
    "cf-connecting-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

/// Resolve the client IP for a request.
///
/// `headers` must have lowercased keys. Precedence: `x-client-ip`, then
/// `x-forwarded-for` (left-most valid entry), then the remaining proxy
/// headers, then the connection peer address.
pub fn get_client_ip(
    headers: &HashMap<String, String>,
    remote_addr: Option<IpAddr>,
) -> Option<String> {
    if let Some(value) = headers.get("x-client-ip") {
        let value = value.trim();
        if is_ip(value) {
            return Some(value.to_string());
        }
    }

    if let Some(value) = headers.get("x-forwarded-for") {
        if let Some(ip) = from_x_forwarded_for(value) {
            return Some(ip);
        }
    }

    for name in SINGLE_VALUE_HEADERS {
        if let Some(value) = headers.get(name) {
            let value = value.trim();
            if is_ip(value) {
                return Some(value.to_string());
            }
        }
    }

    remote_addr.map(|addr| addr.to_string())
}

/// Pick the left-most usable address from an `x-forwarded-for` chain.
///
/// The left-most entry is the originating client; later entries are
/// proxies. Entries can be `unknown` (squid), or carry a port (Azure),
/// both of which are handled here.
fn from_x_forwarded_for(value: &str) -> Option<String> {
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() || entry.eq_ignore_ascii_case("unknown") {
            continue;
        }
        // "host:port" with a single colon; more colons means IPv6.
        let mut parts = entry.split(':');
        if let (Some(host), Some(_port), None) = (parts.next(), parts.next(), parts.next()) {
            if is_ip(host) {
                return Some(host.to_string());
            }
        }
        if is_ip(entry) {
            return Some(entry.to_string());
        }
    }
    None
}

fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_x_client_ip_wins_over_forwarded_for() {
        let headers = headers(&[
            ("x-client-ip", "203.0.113.7"),
            ("x-forwarded-for", "10.0.0.1, 10.0.0.2"),
        ]);
        assert_eq!(
            get_client_ip(&headers, None).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_forwarded_for_takes_leftmost() {
        let headers = headers(&[("x-forwarded-for", "10.0.0.1, 10.0.0.2")]);
        assert_eq!(get_client_ip(&headers, None).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_forwarded_for_skips_unknown() {
        let headers = headers(&[("x-forwarded-for", "unknown, 10.0.0.2")]);
        assert_eq!(get_client_ip(&headers, None).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_forwarded_for_strips_port() {
        let headers = headers(&[("x-forwarded-for", "10.0.0.1:51423, 10.0.0.2")]);
        assert_eq!(get_client_ip(&headers, None).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_ipv6_entry_is_not_split() {
        let headers = headers(&[("x-forwarded-for", "2001:db8::1")]);
        assert_eq!(
            get_client_ip(&headers, None).as_deref(),
            Some("2001:db8::1")
        );
    }

    #[test]
    fn test_invalid_header_falls_through() {
        let headers = headers(&[
            ("x-client-ip", "not-an-ip"),
            ("x-real-ip", "192.0.2.44"),
        ]);
        assert_eq!(get_client_ip(&headers, None).as_deref(), Some("192.0.2.44"));
    }

    #[test]
    fn test_falls_back_to_remote_addr() {
        let headers = headers(&[]);
        let remote: IpAddr = "198.51.100.2".parse().unwrap();
        assert_eq!(
            get_client_ip(&headers, Some(remote)).as_deref(),
            Some("198.51.100.2")
        );
    }

    #[test]
    fn test_no_headers_no_remote() {
        assert!(get_client_ip(&headers(&[]), None).is_none());
    }
}
