//! Per-client rate limiting middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

/// Token bucket for one client
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn try_consume(&mut self, now: Instant, per_second: f64, burst: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(burst);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter keyed by client address
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    /// Allow `requests_per_second` with bursts of twice that
    pub fn new(requests_per_second: u32) -> Self {
        let per_second = requests_per_second.max(1) as f64;
        Self {
            buckets: Arc::new(DashMap::new()),
            per_second,
            burst: per_second * 2.0,
        }
    }

    /// Take one token for `key`
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: self.burst,
                last_update: now,
            })
            .try_consume(now, self.per_second, self.burst)
    }

    /// Forget clients idle for longer than `max_idle`
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < max_idle);
        before.saturating_sub(self.buckets.len())
    }
}

/// Middleware rejecting clients over their budget with 429
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(request.headers());

    if !limiter.check(&client) {
        tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "1")],
            Json(json!({
                "error": {
                    "code": "TOO_MANY_REQUESTS",
                    "message": "Too many requests. Please try again later."
                }
            })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Client address from proxy headers
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(5);

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1"));
        }
        assert!(!limiter.check("10.0.0.1"));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent_and_cleaned_up() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(limiter.cleanup(Duration::from_secs(60)), 2);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("x-real-ip", "10.1.1.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.1.1.1");
        headers.insert("x-forwarded-for", "41.90.0.7, 10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "41.90.0.7");
    }
}
