use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Keyed limiter: each client IP accumulates its own quota over the
/// configured window.
pub struct IpRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
    max_requests: u32,
}

impl IpRateLimiter {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        let max = NonZeroU32::new(max_requests.max(1)).unwrap();
        let period = Duration::from_millis((window_ms / u64::from(max.get())).max(1));
        let quota = Quota::with_period(period).unwrap().allow_burst(max);

        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            max_requests: max.get(),
        }
    }

    /// `Err` carries how long the caller must wait.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.limiter
            .check_key(&key.to_string())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Client IP: proxy headers first, then the socket address.
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        })
        .or_else(|| connect_info.map(|ci| ci.0.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<IpRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), req.extensions().get::<ConnectInfo<SocketAddr>>());

    match limiter.check(&ip) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            tracing::warn!(ip = %ip, "rate limit exceeded");
            let retry_after = wait.as_secs().max(1);

            let body = Json(json!({
                "success": false,
                "message": "Too many requests. Please try again later.",
                "code": "RATE_LIMITED",
            }));

            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("x-ratelimit-limit", limiter.max_requests.to_string()),
                    ("x-ratelimit-remaining", "0".to_string()),
                    ("retry-after", retry_after.to_string()),
                ],
                body,
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_forwarded_header_over_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());

        assert_eq!(client_ip(&headers, None), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_real_ip_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "9.9.9.9");

        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn limiter_blocks_after_burst_and_keys_are_independent() {
        let limiter = IpRateLimiter::new(60_000, 3);

        assert!(limiter.check("1.1.1.1").is_ok());
        assert!(limiter.check("1.1.1.1").is_ok());
        assert!(limiter.check("1.1.1.1").is_ok());
        assert!(limiter.check("1.1.1.1").is_err());

        // a different client is unaffected
        assert!(limiter.check("2.2.2.2").is_ok());
    }
}
