//! Balancer Network Protocol
//!
//! Endpoints served to clients and to nodes registering at startup.

use super::types::FileMeta;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Node registration (called once per node startup).
pub const ENDPOINT_REGISTER: &str = "/register";
/// `PUT|GET|DELETE /files/:file_name`, plus the block routes below it.
pub const ENDPOINT_FILES: &str = "/files";
/// Registry membership test.
pub const ENDPOINT_SEARCH: &str = "/search";
/// Per-node load summary.
pub const ENDPOINT_NODES: &str = "/nodes";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    /// Address the balancer uses to reach the node; doubles as its host name.
    pub node_url: String,
    pub files: Vec<FileMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub registered: bool,
    pub known_nodes: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub force_overwrite: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadBlocksRequest {
    pub indexes: Vec<u32>,
}
