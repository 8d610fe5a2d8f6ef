/// Request classification: end user or internal service
use super::token::TokenService;
use crate::{
    error::{ServiceError, ServiceResult},
    metrics,
};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the shared internal-service secret
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// Trust level an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    EndUser,
    InternalService,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User { account_id: String },
    Service,
}

/// Extract a bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Gatekeeper in front of every core operation
#[derive(Clone)]
pub struct AccessGuard {
    tokens: TokenService,
    internal_key_digest: [u8; 32],
}

impl AccessGuard {
    pub fn new(tokens: TokenService, internal_api_key: &str) -> Self {
        Self {
            tokens,
            internal_key_digest: Sha256::digest(internal_api_key.as_bytes()).into(),
        }
    }

    /// Authenticate in the given mode
    pub fn authenticate(&self, level: TrustLevel, headers: &HeaderMap) -> ServiceResult<Caller> {
        match level {
            TrustLevel::EndUser => self.authenticate_user(headers),
            TrustLevel::InternalService => self.authenticate_service(headers),
        }
    }

    /// End-user mode: bearer token
    pub fn authenticate_user(&self, headers: &HeaderMap) -> ServiceResult<Caller> {
        let result = extract_bearer_token(headers)
            .ok_or_else(|| ServiceError::Unauthenticated("Missing bearer token".to_string()))
            .and_then(|token| self.tokens.validate(&token));

        match result {
            Ok(account_id) => Ok(Caller::User { account_id }),
            Err(e) => {
                metrics::record_auth_failure("user", e.kind().as_str());
                Err(e)
            }
        }
    }

    /// Internal-service mode: shared secret header
    pub fn authenticate_service(&self, headers: &HeaderMap) -> ServiceResult<Caller> {
        let presented = headers
            .get(INTERNAL_API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        match self.verify_internal_key(presented) {
            Ok(()) => Ok(Caller::Service),
            Err(e) => {
                metrics::record_auth_failure("internal", e.kind().as_str());
                Err(e)
            }
        }
    }

    /// Compare a presented secret against the configured key in constant time
    pub fn verify_internal_key(&self, presented: &str) -> ServiceResult<()> {
        if presented.is_empty() {
            return Err(ServiceError::Unauthenticated(
                "Missing internal API key".to_string(),
            ));
        }

        // Fixed-length digests keep the presented key length out of the timing
        let presented_digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        if bool::from(presented_digest[..].ct_eq(&self.internal_key_digest[..])) {
            Ok(())
        } else {
            tracing::warn!("Rejected internal request with invalid API key");
            Err(ServiceError::Unauthorized("Invalid internal API key".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn guard() -> AccessGuard {
        AccessGuard::new(
            TokenService::new("test-secret-key-for-testing-only-0123456789", 3600),
            "internal-test-key",
        )
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(
            extract_bearer_token(&headers("authorization", "Bearer abc")),
            Some("abc".to_string())
        );
        assert_eq!(extract_bearer_token(&headers("authorization", "Basic abc")), None);
        assert_eq!(extract_bearer_token(&headers("authorization", "Bearer ")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_user_mode() {
        let guard = guard();
        let token = guard.tokens.issue("acct-1").unwrap();

        let caller = guard
            .authenticate(
                TrustLevel::EndUser,
                &headers("authorization", &format!("Bearer {}", token)),
            )
            .unwrap();
        assert_eq!(
            caller,
            Caller::User {
                account_id: "acct-1".to_string()
            }
        );

        assert!(matches!(
            guard.authenticate_user(&HeaderMap::new()),
            Err(ServiceError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_internal_mode() {
        let guard = guard();

        assert_eq!(
            guard
                .authenticate(
                    TrustLevel::InternalService,
                    &headers(INTERNAL_API_KEY_HEADER, "internal-test-key")
                )
                .unwrap(),
            Caller::Service
        );

        assert!(matches!(
            guard.authenticate_service(&HeaderMap::new()),
            Err(ServiceError::Unauthenticated(_))
        ));

        assert!(matches!(
            guard.authenticate_service(&headers(INTERNAL_API_KEY_HEADER, "internal-test-kez")),
            Err(ServiceError::Unauthorized(_))
        ));

        // Prefixes of the real key are still a mismatch
        assert!(matches!(
            guard.verify_internal_key("internal"),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_user_token_does_not_pass_internal_mode() {
        let guard = guard();
        let token = guard.tokens.issue("acct-1").unwrap();
        let headers = headers("authorization", &format!("Bearer {}", token));

        assert!(guard
            .authenticate(TrustLevel::InternalService, &headers)
            .is_err());
    }
}
