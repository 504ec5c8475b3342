use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Position of one block inside a logical file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockInfo {
    pub file_name: String,
    /// Zero-based, contiguous within the file.
    pub index: u32,
    pub total_block_count: u32,
}

/// A block together with its bytes.
///
/// Blocks are moved between components, never shared: the codec hands them to the
/// transport, the transport serializes them, the node writes them to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub info: BlockInfo,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(file_name: &str, index: u32, total_block_count: u32, data: Vec<u8>) -> Self {
        Self {
            info: BlockInfo {
                file_name: file_name.to_string(),
                index,
                total_block_count,
            },
            data,
        }
    }
}

/// The user-facing unit accepted and returned by the balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// The share of a file's blocks pushed to a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFile {
    pub file_name: String,
    pub total_block_count: u32,
    /// Length of the whole logical file, recorded by the node for registration.
    #[serde(default)]
    pub file_size: Option<u64>,
    pub blocks: Vec<Block>,
}

/// File names become directory names on the nodes, so anything that could
/// escape the data root or collide with bookkeeping files is refused.
pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.len() > 255;

    if invalid {
        return Err(StoreError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Serde adapter carrying raw bytes as a base64 string inside JSON payloads.
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
