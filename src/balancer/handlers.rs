use super::protocol::{
    DownloadBlocksRequest, ENDPOINT_FILES, ENDPOINT_NODES, ENDPOINT_REGISTER, ENDPOINT_SEARCH,
    RegisterNodeRequest, RegisterNodeResponse, UploadQuery,
};
use super::service::BalancerService;
use super::types::{DEFAULT_CONTENT_TYPE, NodeLoad};
use crate::blocks::{Block, SourceFile};
use crate::error::StoreError;
use crate::state::State;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, extract::Path};
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub fn router(service: Arc<BalancerService>) -> Router {
    Router::new()
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(
            &format!("{}/:file_name", ENDPOINT_FILES),
            get(handle_download_file)
                .put(handle_upload_file)
                .delete(handle_delete_file),
        )
        .route(
            &format!("{}/:file_name/blocks", ENDPOINT_FILES),
            post(handle_download_blocks),
        )
        .route(
            &format!("{}/:file_name/blocks/:index", ENDPOINT_FILES),
            get(handle_download_block).patch(handle_overwrite_block),
        )
        .route(&format!("{}/:file_name", ENDPOINT_SEARCH), get(handle_search))
        .route(ENDPOINT_NODES, get(handle_nodes))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(service))
}

fn status_for(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::InvalidFileName(_) | StoreError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        StoreError::MissingBlock { .. } | StoreError::Unreachable { .. } | StoreError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: StoreError) -> Response {
    (status_for(&error), Json(State::from_error(&error))).into_response()
}

fn state_response(state: State) -> (StatusCode, Json<State>) {
    let status = if state.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(state))
}

pub async fn handle_register(
    Extension(service): Extension<Arc<BalancerService>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Json<RegisterNodeResponse> {
    let known_nodes = service.register_node(&req.node_url, &req.files);
    Json(RegisterNodeResponse {
        registered: true,
        known_nodes,
    })
}

pub async fn handle_upload_file(
    Extension(service): Extension<Arc<BalancerService>>,
    Path(file_name): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let file = SourceFile {
        name: file_name,
        content_type,
        data: body.to_vec(),
    };

    match service
        .upload_file(file, query.force_overwrite.unwrap_or(false))
        .await
    {
        Ok(state) => state_response(state).into_response(),
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            error_response(e)
        }
    }
}

pub async fn handle_download_file(
    Extension(service): Extension<Arc<BalancerService>>,
    Path(file_name): Path<String>,
) -> Response {
    match service.download_file(&file_name).await {
        Ok(file) => ([(header::CONTENT_TYPE, file.content_type)], file.data).into_response(),
        Err(e) => {
            if !e.is_not_found() {
                tracing::error!("Download of {} failed: {}", file_name, e);
            }
            error_response(e)
        }
    }
}

pub async fn handle_download_block(
    Extension(service): Extension<Arc<BalancerService>>,
    Path((file_name, index)): Path<(String, u32)>,
) -> (StatusCode, Json<Option<Block>>) {
    match service.download_block(&file_name, index).await {
        Ok(Some(block)) => (StatusCode::OK, Json(Some(block))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(None)),
        Err(e) => {
            tracing::error!("Download of block {} of {} failed: {}", index, file_name, e);
            (status_for(&e), Json(None))
        }
    }
}

pub async fn handle_download_blocks(
    Extension(service): Extension<Arc<BalancerService>>,
    Path(file_name): Path<String>,
    Json(req): Json<DownloadBlocksRequest>,
) -> Response {
    match service.download_blocks(&file_name, &req.indexes).await {
        Ok(blocks) => Json(blocks).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_overwrite_block(
    Extension(service): Extension<Arc<BalancerService>>,
    Path((file_name, index)): Path<(String, u32)>,
    body: Bytes,
) -> (StatusCode, Json<State>) {
    let state = service
        .overwrite_block(&file_name, body.to_vec(), index)
        .await;
    state_response(state)
}

pub async fn handle_delete_file(
    Extension(service): Extension<Arc<BalancerService>>,
    Path(file_name): Path<String>,
) -> (StatusCode, Json<State>) {
    state_response(service.delete_file(&file_name).await)
}

pub async fn handle_search(
    Extension(service): Extension<Arc<BalancerService>>,
    Path(file_name): Path<String>,
) -> Json<bool> {
    Json(service.search(&file_name))
}

pub async fn handle_nodes(
    Extension(service): Extension<Arc<BalancerService>>,
) -> Json<Vec<NodeLoad>> {
    Json(service.node_loads())
}
