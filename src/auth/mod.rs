/// Authentication: session tokens, the access guard, and axum extractors

mod guard;
mod token;

pub use guard::{extract_bearer_token, AccessGuard, Caller, TrustLevel, INTERNAL_API_KEY_HEADER};
pub use token::{SessionClaims, TokenService};

use crate::{context::AppContext, error::ServiceError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated end user - extracts and validates the bearer token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        match state.guard.authenticate_user(&parts.headers)? {
            Caller::User { account_id } => Ok(AuthContext { account_id }),
            Caller::Service => Err(ServiceError::Unauthenticated(
                "End-user credentials required".to_string(),
            )),
        }
    }
}

/// Authenticated internal service - checks the shared secret header
#[derive(Debug, Clone)]
pub struct InternalServiceContext;

#[async_trait]
impl FromRequestParts<AppContext> for InternalServiceContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        state.guard.authenticate_service(&parts.headers)?;
        Ok(InternalServiceContext)
    }
}
