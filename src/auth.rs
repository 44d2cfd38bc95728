use crate::domain::entities::user::UserId;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Minimum required key length (256 bits of base64)
pub const MIN_KEY_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthConfigError {
    #[error("API_KEYS is empty; expected comma-separated user:key pairs")]
    NoKeys,

    #[error("Malformed API_KEYS entry for '{0}' (expected user:key)")]
    Malformed(String),

    #[error("API key for user '{user}' is too weak (length {length}, minimum {MIN_KEY_LENGTH})")]
    WeakKey { user: String, length: usize },

    #[error("API key for user '{0}' is configured twice")]
    DuplicateKey(String),
}

/// The user an API key resolved to, placed in request extensions
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser(pub UserId);

/// Bearer API keys mapped to the user they act for
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, UserId>,
}

impl ApiKeys {
    /// Parse `user:key` pairs separated by commas
    pub fn parse(raw: &str) -> Result<Self, AuthConfigError> {
        let mut keys = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (user, key) = entry
                .split_once(':')
                .map(|(u, k)| (u.trim(), k.trim()))
                .filter(|(u, k)| !u.is_empty() && !k.is_empty())
                .ok_or_else(|| {
                    let user = entry.split_once(':').map(|(u, _)| u.trim()).unwrap_or("?");
                    AuthConfigError::Malformed(user.to_string())
                })?;

            if key.len() < MIN_KEY_LENGTH {
                return Err(AuthConfigError::WeakKey {
                    user: user.to_string(),
                    length: key.len(),
                });
            }
            if keys.insert(key.to_string(), UserId::new(user)).is_some() {
                return Err(AuthConfigError::DuplicateKey(user.to_string()));
            }
        }

        if keys.is_empty() {
            return Err(AuthConfigError::NoKeys);
        }

        tracing::info!("✓ API authentication initialized with {} key(s)", keys.len());
        Ok(Self { keys })
    }

    pub fn user_for(&self, key: &str) -> Option<&UserId> {
        self.keys.get(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Middleware to require authentication for protected endpoints
pub async fn require_auth(
    State(keys): State<Arc<ApiKeys>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(key) => match keys.user_for(key.trim()) {
            Some(user) => {
                let user = user.clone();
                request.extensions_mut().insert(AuthenticatedUser(user));
                Ok(next.run(request).await)
            }
            None => {
                tracing::warn!("Invalid API key attempted");
                Err(StatusCode::UNAUTHORIZED)
            }
        },
        None if auth_header.is_some() => {
            tracing::warn!("Invalid Authorization header format (expected Bearer token)");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const KEY_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_api_key_validation() {
        let keys = ApiKeys::parse(&format!("alice:{}, bob:{}", KEY_A, KEY_B)).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.user_for(KEY_A), Some(&UserId::new("alice")));
        assert_eq!(keys.user_for(KEY_B), Some(&UserId::new("bob")));
        assert_eq!(keys.user_for("invalid_key"), None);
        assert_eq!(keys.user_for(""), None);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert_eq!(ApiKeys::parse("").unwrap_err(), AuthConfigError::NoKeys);
        assert!(matches!(
            ApiKeys::parse(KEY_A),
            Err(AuthConfigError::Malformed(_))
        ));
        assert!(matches!(
            ApiKeys::parse("alice:short"),
            Err(AuthConfigError::WeakKey { length: 5, .. })
        ));
        assert!(matches!(
            ApiKeys::parse(&format!("alice:{},bob:{}", KEY_A, KEY_A)),
            Err(AuthConfigError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_malformed_entry_does_not_leak_key() {
        let err = ApiKeys::parse(KEY_A).unwrap_err();
        assert_eq!(err, AuthConfigError::Malformed("?".to_string()));
        assert!(!err.to_string().contains(KEY_A));
    }
}
