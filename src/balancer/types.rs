use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// File name a node reports when it holds nothing, so that it still registers.
/// Never becomes a registry entry.
pub const REGISTRATION_SENTINEL: &str = "__node_init__";

pub const DEFAULT_PRIORITY: u32 = 0;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What a node reports about one file during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    pub indexes: Vec<u32>,
    pub total_block_count: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl FileMeta {
    pub fn sentinel() -> Self {
        Self {
            file_name: REGISTRATION_SENTINEL.to_string(),
            indexes: vec![0],
            total_block_count: 1,
            file_size: Some(0),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.file_name == REGISTRATION_SENTINEL
    }
}

/// One node's share of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBlockInfo {
    pub host_name: String,
    pub indexes: BTreeSet<u32>,
    /// Load/latency hint, lower is preferred.
    pub priority: u32,
}

impl NodeBlockInfo {
    pub fn new(host_name: &str, indexes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            host_name: host_name.to_string(),
            indexes: indexes.into_iter().collect(),
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Registry entry for a single file.
///
/// For a well-formed file the shares in `nodes` cover `0..block_count` exactly once.
/// Registration merges and failed pushes can leave gaps; readers must check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFileInfo {
    pub block_count: u32,
    /// `None` when the size is not known (registration without size, or after a
    /// block overwrite); the stored block lengths are authoritative then.
    pub file_size: Option<u64>,
    pub content_type: String,
    /// Hex SHA-256 of the payload as uploaded.
    pub checksum: Option<String>,
    pub nodes: Vec<NodeBlockInfo>,
    /// Set when an upload publishes the entry; 0 for entries built from registrations.
    #[serde(default)]
    pub revision: u64,
}

impl NodeFileInfo {
    pub fn new(block_count: u32, file_size: Option<u64>) -> Self {
        Self {
            block_count,
            file_size,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            checksum: None,
            nodes: Vec::new(),
            revision: 0,
        }
    }

    pub fn from_meta(meta: &FileMeta) -> Self {
        Self::new(meta.total_block_count, meta.file_size)
    }

    /// Hosts whose share contains `index`.
    pub fn holders(&self, index: u32) -> Vec<&NodeBlockInfo> {
        self.nodes
            .iter()
            .filter(|node| node.indexes.contains(&index))
            .collect()
    }

    /// Lowest-priority holder of `index`; the first one wins a tie.
    pub fn preferred_holder(&self, index: u32) -> Option<&str> {
        self.nodes
            .iter()
            .filter(|node| node.indexes.contains(&index))
            .min_by_key(|node| node.priority)
            .map(|node| node.host_name.as_str())
    }

    /// Distinct hosts referenced by this file, in first-seen order.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !hosts.contains(&node.host_name) {
                hosts.push(node.host_name.clone());
            }
        }
        hosts
    }

    /// Indexes in `0..block_count` that no node holds.
    pub fn missing_indexes(&self) -> Vec<u32> {
        (0..self.block_count)
            .filter(|index| self.holders(*index).is_empty())
            .collect()
    }
}

/// Assigned block count of a node across every file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub host_name: String,
    pub block_count: usize,
    pub priority: f64,
}
