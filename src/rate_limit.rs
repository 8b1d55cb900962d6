//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::debug;

use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Sustained login attempts per second per IP.
const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();

/// Burst of login attempts allowed before throttling kicks in.
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Rate limiting configuration for the login endpoint.
#[derive(Clone)]
pub struct LoginRateLimit {
    limiter: Arc<IpLimiter>,
    trust_forwarded_for: bool,
}

impl LoginRateLimit {
    /// 5 attempts in a burst, then one per second, per client IP.
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self::with_quota(
            Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            trust_forwarded_for,
        )
    }

    pub fn with_quota(quota: Quota, trust_forwarded_for: bool) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            trust_forwarded_for,
        }
    }
}

/// Middleware throttling login attempts per client IP.
pub async fn rate_limit_login(
    State(config): State<LoginRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, config.trust_forwarded_for) {
        Ok(ip) => ip,
        Err(_) => {
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match config.limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            debug!(ip = %ip, "Login rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many authentication attempts. Please wait before trying again.",
            )
                .into_response()
        }
    }
}
