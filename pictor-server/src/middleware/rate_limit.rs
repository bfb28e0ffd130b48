use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::server::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use pictor_core::PictorError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
/// Opportunistic cleanup threshold; the counter map is otherwise unbounded
/// in the number of distinct client IPs.
const CLEANUP_THRESHOLD: usize = 10_000;

/// Fixed-window per-IP request counter. `limit == 0` disables limiting.
pub struct RateLimiter {
    counters: DashMap<IpAddr, Window>,
    limit: u32,
}

struct Window {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            counters: DashMap::new(),
            limit,
        }
    }

    /// Count one request. Returns the retry-after seconds when over budget.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.limit == 0 {
            return Ok(());
        }
        if self.counters.len() > CLEANUP_THRESHOLD {
            self.counters.retain(|_, w| w.started.elapsed() < WINDOW);
        }
        let mut entry = self.counters.entry(ip).or_insert_with(|| Window {
            count: 0,
            started: Instant::now(),
        });
        if entry.started.elapsed() >= WINDOW {
            entry.count = 0;
            entry.started = Instant::now();
        }
        entry.count += 1;
        if entry.count > self.limit {
            let retry = WINDOW
                .saturating_sub(entry.started.elapsed())
                .as_secs()
                .max(1);
            Err(retry)
        } else {
            Ok(())
        }
    }
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match state.rate_limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(|r| r.0.clone())
                .unwrap_or_default();
            tracing::warn!(client_ip = %ip, request_id = %request_id, "rate limit exceeded");
            let mut response =
                ApiError::new(PictorError::RateLimitExceeded, request_id).into_response();
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(retry_after));
            headers.insert(
                "x-ratelimit-limit",
                HeaderValue::from(state.rate_limiter.limit),
            );
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            response
        }
    }
}

/// Prefer the first X-Forwarded-For hop (the service normally sits behind a
/// terminating proxy), then the socket peer.
fn client_ip(request: &Request) -> IpAddr {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn requests_within_budget_pass() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check(ip(1)).is_ok());
        }
    }

    #[test]
    fn request_over_budget_is_rejected_with_retry_after() {
        let limiter = RateLimiter::new(2);
        limiter.check(ip(1)).unwrap();
        limiter.check(ip(1)).unwrap();
        let retry = limiter.check(ip(1)).unwrap_err();
        assert!((1..=60).contains(&retry));
    }

    #[test]
    fn budgets_are_per_ip() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        assert!(limiter.check(ip(2)).is_ok());
    }

    #[test]
    fn zero_limit_disables_limiting() {
        let limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.check(ip(1)).is_ok());
        }
    }
}
