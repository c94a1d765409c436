//! Per-identity request rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::http::HeaderMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use super::auth::Identity;

pub type ApiLimiter = DefaultKeyedRateLimiter<String>;

pub fn build_limiter(per_minute: u32) -> Arc<ApiLimiter> {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).expect("clamped above zero"));
    Arc::new(RateLimiter::keyed(quota))
}

/// Bucket by API key when present, otherwise by forwarded client address.
pub fn limiter_key(identity: &Identity, headers: &HeaderMap) -> String {
    match identity {
        Identity::Key(key) => format!("key:{key}"),
        Identity::Open => headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|addr| format!("addr:{}", addr.trim()))
            .unwrap_or_else(|| "addr:local".to_string()),
    }
}

pub fn check(limiter: &ApiLimiter, key: &str) -> Result<(), ()> {
    limiter.check_key(&key.to_string()).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn limit_trips_after_quota() {
        let limiter = build_limiter(2);
        assert!(check(&limiter, "key:a").is_ok());
        assert!(check(&limiter, "key:a").is_ok());
        assert!(check(&limiter, "key:a").is_err());
        assert!(check(&limiter, "key:b").is_ok(), "buckets are independent");
    }

    #[test]
    fn key_prefers_api_key_over_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.9, lb"));

        assert_eq!(
            limiter_key(&Identity::Key("abc".to_string()), &headers),
            "key:abc"
        );
        assert_eq!(limiter_key(&Identity::Open, &headers), "addr:10.0.0.9");
        assert_eq!(limiter_key(&Identity::Open, &HeaderMap::new()), "addr:local");
    }
}
