use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::app::auth::AuthService;
use crate::http::AppError;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub username: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::unauthorized("No token provided"))?;

        let service = AuthService::new(
            state.store.clone(),
            state.token_key,
            state.token_ttl_hours,
        );
        let claims = service
            .verify_token(token)
            .map_err(|err| {
                tracing::error!(error = ?err, "failed to verify token");
                AppError::internal()
            })?
            .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

        // A user deleted after the token was issued is rejected here.
        let identity = state
            .store
            .find_identity(claims.user_id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, user_id = claims.user_id, "failed to load token user");
                AppError::internal()
            })?
            .ok_or_else(|| AppError::unauthorized("User not found"))?;

        Ok(AuthUser {
            user_id: identity.id,
            email: identity.email,
            username: identity.username,
        })
    }
}
