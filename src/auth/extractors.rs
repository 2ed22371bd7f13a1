use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::warn;

use super::jwt::TokenError;
use crate::{error::AppError, state::AppState, users::model::PublicUser};

/// The authenticated caller, resolved from the bearer token and re-read from the store.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

/// Token from `Authorization: Bearer <token>`, if present and non-empty.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            AppError::Unauthenticated("No token provided. Please log in.".into())
        })?;

        let claims = state.keys.verify(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            match e {
                TokenError::Expired => {
                    AppError::Unauthenticated("Token expired. Please log in again.".into())
                }
                TokenError::Invalid(_) => {
                    AppError::Unauthenticated("Invalid token. Please log in again.".into())
                }
            }
        })?;

        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for a user that no longer exists");
            AppError::NotFound("User not found. Please log in again.".into())
        })?;

        Ok(CurrentUser(user.into()))
    }
}
