// HTTP middleware

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use fileshare_core::models::SubjectId;

use super::{AppError, AppState};

/// Header carrying the caller's session credential
pub const USER_TOKEN_HEADER: &str = "x-user-token";

/// Authenticated subject resolved through the identity provider
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: SubjectId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let credential = parts
            .headers
            .get(USER_TOKEN_HEADER)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|e| AppError::unauthorized(format!("Invalid {USER_TOKEN_HEADER} header: {e}")))
            })
            .transpose()?;

        let subject = app_state
            .identity
            .resolve(credential)
            .await?
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        Ok(Self { subject })
    }
}
