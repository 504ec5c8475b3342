//! Node Network Protocol
//!
//! Endpoints a node serves to the balancer and the JSON bodies they exchange.
//! Block bytes are carried base64-encoded.

use crate::blocks::PartialFile;
use crate::blocks::types::base64_bytes;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Stores a node's share of a file.
pub const ENDPOINT_SAVE_FILE: &str = "/node/save_file";
/// Adds or replaces a single block.
pub const ENDPOINT_ADD_BLOCK: &str = "/node/add_or_replace_block";
/// `DELETE {ENDPOINT_FILES}/:file_name` and `GET {ENDPOINT_FILES}/:file_name/blocks/:index`.
pub const ENDPOINT_FILES: &str = "/node/files";
/// Catalog summary.
pub const ENDPOINT_HEALTH: &str = "/node/health";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveFileRequest {
    pub partial_file: PartialFile,
    #[serde(default)]
    pub force_overwrite: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBlockRequest {
    pub file_name: String,
    pub index: u32,
    pub total_block_count: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub allow_overwrite: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeHealthResponse {
    pub node_name: String,
    pub file_count: usize,
    pub block_count: usize,
}
