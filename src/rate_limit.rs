use crate::auth::AuthenticatedUser;
use crate::domain::entities::user::UserId;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter configuration
pub struct RateLimiterConfig {
    /// Maximum requests per minute, per user
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100, // Default: 100 requests per minute
        }
    }
}

/// One bucket per authenticated user
pub type UserRateLimiter = Arc<RateLimiter<UserId, DefaultKeyedStateStore<UserId>, DefaultClock>>;

/// Create a new rate limiter; a zero rate is treated as one request per minute
pub fn create_rate_limiter(config: RateLimiterConfig) -> UserRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)))
}

/// Middleware to apply rate limiting. Runs after auth; requests without an
/// authenticated user are passed through untouched.
pub async fn rate_limit_middleware(
    State(limiter): State<UserRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let Some(AuthenticatedUser(user)) = request.extensions().get::<AuthenticatedUser>().cloned() else {
        return next.run(request).await;
    };

    match limiter.check_key(&user) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!("Rate limit exceeded for {}", user);
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_is_per_user() {
        let limiter = create_rate_limiter(RateLimiterConfig {
            requests_per_minute: 1,
        });
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        assert!(limiter.check_key(&alice).is_ok());
        assert!(limiter.check_key(&alice).is_err());
        assert!(limiter.check_key(&bob).is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 100);
    }
}
