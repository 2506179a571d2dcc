//! Auth plumbing: bearer-token extractor and the development session endpoint.

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::Json;
use serde::Deserialize;

use crate::services::session::bearer_token;
use crate::state::AppState;
use crate::store::Identity;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Identity resolved from `Authorization: Bearer <token>`.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let app_state = AppState::from_ref(state);
        let identity = app_state
            .identities
            .verify(token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "token validation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { identity })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct DevSessionBody {
    pub identity: String,
}

/// `POST /api/dev/session`: mint a token for any identity without a login flow.
///
/// Enabled only when `DEV_SESSION_ENDPOINT=true`.
pub async fn dev_session(
    State(state): State<AppState>,
    Json(body): Json<DevSessionBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.config.dev_session_endpoint {
        return Err(StatusCode::NOT_FOUND);
    }
    let identity = body.identity.trim();
    if identity.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = state
        .identities
        .issue(identity)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    tracing::info!(identity, "dev session issued");
    Ok(Json(serde_json::json!({ "token": token, "identity": identity })))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
