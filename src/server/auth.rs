//! Bearer-token authentication against the store's auth backend.

use axum::http::HeaderMap;
use tracing::debug;

use super::SharedState;
use crate::error::{AppError, AppResult, StoreError};

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

/// Resolve the caller from the Authorization header. The token is verified
/// by the auth backend; the audience claim must match configuration.
pub async fn authenticate(state: &SharedState, headers: &HeaderMap) -> AppResult<AuthedUser> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .ok_or_else(|| AppError::Unauthorized {
            message: "missing bearer token".to_string(),
        })?;

    let claims = state.store.verify_token(bearer).await.map_err(|e| match e {
        StoreError::Api { status, .. } if status == 401 || status == 403 => {
            AppError::Unauthorized {
                message: "invalid or expired token".to_string(),
            }
        }
        other => AppError::Store(other),
    })?;

    if !claims.aud.is_empty() && claims.aud != state.config.auth.jwt_audience {
        return Err(AppError::Unauthorized {
            message: "token audience mismatch".to_string(),
        });
    }

    debug!(user_id = %claims.id, "request authenticated");
    Ok(AuthedUser { user_id: claims.id })
}
