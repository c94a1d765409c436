//! API-key authentication.
//!
//! Keys come from the comma-separated `API_KEYS` variable. An empty set
//! disables authentication entirely (development mode). Clients present a
//! key via the `X-API-Key` header or the `api_key` query parameter.

use std::collections::HashSet;

use axum::http::{HeaderMap, Uri};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "api_key";

/// The identity a request authenticated as; `Open` when auth is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Open,
    Key(String),
}

pub fn authenticate(
    valid_keys: &HashSet<String>,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Identity, ()> {
    if valid_keys.is_empty() {
        return Ok(Identity::Open);
    }

    let presented = header_key(headers).or_else(|| query_key(uri));
    match presented {
        Some(key) if valid_keys.contains(&key) => Ok(Identity::Key(key)),
        _ => Err(()),
    }
}

fn header_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn query_key(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    for pair in query.split('&') {
        let (name, value) = pair.split_once('=')?;
        if name == API_KEY_QUERY && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn keys(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn open_access_when_no_keys_configured() {
        let headers = HeaderMap::new();
        let uri: Uri = "/api/parse".parse().expect("uri");
        assert_eq!(
            authenticate(&HashSet::new(), &headers, &uri),
            Ok(Identity::Open)
        );
    }

    #[test]
    fn header_key_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret-1"));
        let uri: Uri = "/api/parse".parse().expect("uri");

        let identity = authenticate(&keys(&["secret-1"]), &headers, &uri).expect("authorized");
        assert_eq!(identity, Identity::Key("secret-1".to_string()));
    }

    #[test]
    fn query_key_is_accepted() {
        let headers = HeaderMap::new();
        let uri: Uri = "/api/parse?api_key=secret-2&model=x".parse().expect("uri");

        let identity = authenticate(&keys(&["secret-2"]), &headers, &uri).expect("authorized");
        assert_eq!(identity, Identity::Key("secret-2".to_string()));
    }

    #[test]
    fn wrong_or_missing_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("nope"));
        let uri: Uri = "/api/parse".parse().expect("uri");

        assert!(authenticate(&keys(&["secret"]), &headers, &uri).is_err());
        assert!(authenticate(&keys(&["secret"]), &HeaderMap::new(), &uri).is_err());
    }
}
