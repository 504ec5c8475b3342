use super::agent::NodeAgent;
use super::protocol::{
    AddBlockRequest, ENDPOINT_ADD_BLOCK, ENDPOINT_FILES, ENDPOINT_HEALTH, ENDPOINT_SAVE_FILE,
    NodeHealthResponse, SaveFileRequest,
};
use crate::blocks::Block;
use crate::error::StoreError;
use crate::state::State;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router, extract::Path, http::StatusCode};
use std::sync::Arc;

/// Blocks arrive base64-encoded in batches, so the default 2 MB body cap is too small.
const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

pub fn router(agent: Arc<NodeAgent>) -> Router {
    Router::new()
        .route(ENDPOINT_SAVE_FILE, post(handle_save_file))
        .route(ENDPOINT_ADD_BLOCK, post(handle_add_or_replace_block))
        .route(
            &format!("{}/:file_name", ENDPOINT_FILES),
            delete(handle_delete_file),
        )
        .route(
            &format!("{}/:file_name/blocks/:index", ENDPOINT_FILES),
            get(handle_download_block),
        )
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(agent))
}

fn state_response(state: State) -> (StatusCode, Json<State>) {
    let status = if state.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(state))
}

pub async fn handle_save_file(
    Extension(agent): Extension<Arc<NodeAgent>>,
    Json(req): Json<SaveFileRequest>,
) -> (StatusCode, Json<State>) {
    tracing::debug!(
        "SaveFile {} ({} blocks, force={})",
        req.partial_file.file_name,
        req.partial_file.blocks.len(),
        req.force_overwrite
    );
    let state = agent
        .add_or_replace_file(req.partial_file, req.force_overwrite)
        .await;
    state_response(state)
}

pub async fn handle_add_or_replace_block(
    Extension(agent): Extension<Arc<NodeAgent>>,
    Json(req): Json<AddBlockRequest>,
) -> (StatusCode, Json<State>) {
    let block = Block::new(&req.file_name, req.index, req.total_block_count, req.data);
    let state = agent.add_or_replace_block(block, req.allow_overwrite).await;
    state_response(state)
}

pub async fn handle_delete_file(
    Extension(agent): Extension<Arc<NodeAgent>>,
    Path(file_name): Path<String>,
) -> (StatusCode, Json<State>) {
    state_response(agent.delete_file(&file_name).await)
}

pub async fn handle_download_block(
    Extension(agent): Extension<Arc<NodeAgent>>,
    Path((file_name, index)): Path<(String, u32)>,
) -> (StatusCode, Json<Option<Block>>) {
    match agent.read_block(&file_name, index).await {
        Ok(Some(block)) => (StatusCode::OK, Json(Some(block))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(None)),
        Err(e) => {
            tracing::error!("Failed to read block {} of {}: {}", index, file_name, e);
            if e.is_not_found() {
                (StatusCode::NOT_FOUND, Json(None))
            } else if matches!(e, StoreError::InvalidFileName(_)) {
                (StatusCode::BAD_REQUEST, Json(None))
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(None))
            }
        }
    }
}

pub async fn handle_health(
    Extension(agent): Extension<Arc<NodeAgent>>,
) -> Json<NodeHealthResponse> {
    Json(NodeHealthResponse {
        node_name: agent.node_name().to_string(),
        file_count: agent.catalog().file_count(),
        block_count: agent.catalog().block_count(),
    })
}
