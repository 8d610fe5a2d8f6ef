/// Signed session tokens
///
/// Tokens are HS256 JWTs carrying the account id as subject. There is no
/// revocation list: a token stays valid until it expires, even if the
/// account is deactivated in the meantime.
use crate::error::{ServiceError, ServiceResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates session tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issue a token whose subject is `account_id`
    pub fn issue(&self, account_id: &str) -> ServiceResult<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature, structure and expiry; returns the account id
    pub fn validate(&self, token: &str) -> ServiceResult<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("Token validation failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthenticated("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    ServiceError::Unauthenticated("Invalid token signature".to_string())
                }
                _ => ServiceError::Unauthenticated("Invalid token".to_string()),
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(ServiceError::Unauthenticated("Invalid token".to_string()));
        }

        Ok(data.claims.sub)
    }
}
