//! Canvas REST routes: create, list, fetch, share, delete, and the durable
//! update fallback for clients that cannot hold a websocket open.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::element::normalize_all;
use crate::frame::{Data, now_ms};
use crate::protocol::{self, CANVAS_UPDATED, KEY_ELEMENTS};
use crate::routes::auth::AuthUser;
use crate::services::canvas::{self, CanvasError};
use crate::state::AppState;
use crate::store::DocumentMeta;

const DEFAULT_CANVAS_NAME: &str = "Untitled Canvas";

pub(crate) fn canvas_error_to_status(err: &CanvasError) -> StatusCode {
    match err {
        CanvasError::NotFound(_) => StatusCode::NOT_FOUND,
        CanvasError::AccessDenied(_) | CanvasError::SenderMismatch { .. } => StatusCode::FORBIDDEN,
        CanvasError::NotJoined(_) => StatusCode::CONFLICT,
        CanvasError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn to_status(err: CanvasError) -> StatusCode {
    let status = canvas_error_to_status(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "canvas request failed");
    }
    status
}

#[derive(Deserialize)]
pub struct CreateCanvasBody {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct ShareCanvasBody {
    pub identity: String,
}

/// `POST /api/canvas`: create a canvas owned by the caller.
pub async fn create_canvas(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateCanvasBody>,
) -> Result<(StatusCode, Json<DocumentMeta>), StatusCode> {
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_CANVAS_NAME);
    let meta = canvas::create_canvas(&state, &auth.identity, name)
        .await
        .map_err(to_status)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

/// `GET /api/canvas`: canvases the caller owns or collaborates on.
pub async fn list_canvases(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<DocumentMeta>>, StatusCode> {
    let metas = canvas::list_canvases(&state, &auth.identity)
        .await
        .map_err(to_status)?;
    Ok(Json(metas))
}

/// `GET /api/canvas/{id}`: authoritative snapshot and metadata.
pub async fn get_canvas(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Data>, StatusCode> {
    canvas::authorize(&state, document_id, &auth.identity)
        .await
        .map_err(to_status)?;
    let doc = canvas::load_snapshot(&state, document_id)
        .await
        .map_err(to_status)?;
    Ok(Json(protocol::snapshot_payload(&doc.meta, &doc.elements)))
}

/// `PUT /api/canvas/{id}`: durable update over HTTP. Same merge, persist
/// and fan-out path as `canvas:update`; every joined peer is notified.
pub async fn update_canvas(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
    Json(body): Json<Data>,
) -> Result<Json<Data>, StatusCode> {
    let Some(Value::Array(items)) = body.get(KEY_ELEMENTS) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let elements = normalize_all(items, now_ms());
    let removed_ids = protocol::removed_ids(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let committed = canvas::apply_durable_update(&state, document_id, &auth.identity, &elements, &removed_ids)
        .await
        .map_err(to_status)?;

    let data = protocol::update_applied_payload(document_id, &committed.elements, &auth.identity, now_ms());
    let frame = protocol::notification(CANVAS_UPDATED, document_id, data.clone());
    canvas::broadcast(&state, document_id, &frame, None).await;
    Ok(Json(data))
}

/// `POST /api/canvas/{id}/share`: owner grants access to another identity.
pub async fn share_canvas(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
    Json(body): Json<ShareCanvasBody>,
) -> Result<Json<DocumentMeta>, StatusCode> {
    let collaborator = body.identity.trim();
    if collaborator.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let meta = canvas::share_canvas(&state, document_id, &auth.identity, collaborator)
        .await
        .map_err(to_status)?;
    Ok(Json(meta))
}

/// `DELETE /api/canvas/{id}`: owner only.
pub async fn delete_canvas(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    canvas::delete_canvas(&state, document_id, &auth.identity)
        .await
        .map_err(to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
