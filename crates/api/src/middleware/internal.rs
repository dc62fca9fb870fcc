//! Extractors for system-internal callers.
//!
//! Internal callers present the configured `INTERNAL_API_SECRET` as their
//! Bearer token. When no secret is configured, nothing is internal.

use atelier_core::authority::InternalAuthority;
use atelier_core::error::CoreError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::auth::{bearer_token, user_from_token, AuthUser};
use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the internal secret on requests that also carry a user
/// token (e.g. a system job created on behalf of a user).
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Whoever is calling: the system itself or an authenticated user.
#[derive(Debug, Clone)]
pub enum Caller {
    Internal(InternalAuthority),
    User(AuthUser),
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if let Some(authority) =
            InternalAuthority::from_bearer(state.config.internal_api_secret.as_deref(), token)
        {
            return Ok(Caller::Internal(authority));
        }
        user_from_token(token, state).map(Caller::User)
    }
}

/// An internal caller or an admin user. Rejects other users with 403.
pub struct AdminOrInternal(pub Caller);

impl FromRequestParts<AppState> for AdminOrInternal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await? {
            Caller::User(user) if !user.is_admin() => Err(AppError::Core(CoreError::Forbidden(
                "Admin role required".into(),
            ))),
            caller => Ok(AdminOrInternal(caller)),
        }
    }
}

/// Internal authority presented in [`INTERNAL_TOKEN_HEADER`], if valid.
pub struct InternalHeader(pub Option<InternalAuthority>);

impl FromRequestParts<AppState> for InternalHeader {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let authority = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|presented| {
                InternalAuthority::from_bearer(state.config.internal_api_secret.as_deref(), presented)
            });
        Ok(InternalHeader(authority))
    }
}
