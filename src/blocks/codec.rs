use super::types::{Block, SourceFile};
use crate::error::{Result, StoreError};
use sha2::{Digest, Sha256};

/// Number of blocks needed to hold `len` bytes.
pub fn block_count(len: usize, block_size: usize) -> u32 {
    if block_size == 0 {
        return 0;
    }
    len.div_ceil(block_size) as u32
}

/// Cuts a file into `ceil(len / block_size)` blocks in file order.
///
/// The last block may be shorter than `block_size`; an empty file yields no blocks.
pub fn split(file: &SourceFile, block_size: usize) -> Result<Vec<Block>> {
    if block_size == 0 {
        return Err(StoreError::InvalidConfig(
            "block size must be greater than zero".to_string(),
        ));
    }

    let total = block_count(file.data.len(), block_size);
    let blocks = file
        .data
        .chunks(block_size)
        .enumerate()
        .map(|(index, chunk)| Block::new(&file.name, index as u32, total, chunk.to_vec()))
        .collect();

    Ok(blocks)
}

/// Reassembles blocks (in any order) into the original payload.
///
/// Every index in `0..total_block_count` must be present exactly once. The result
/// is truncated to `expected_size`, which strips any padding a node may have
/// appended to the final block.
pub fn join(mut blocks: Vec<Block>, expected_size: u64) -> Result<Vec<u8>> {
    blocks.sort_by_key(|block| block.info.index);

    let file_name = blocks
        .first()
        .map(|block| block.info.file_name.clone())
        .unwrap_or_default();
    let total = blocks
        .first()
        .map(|block| block.info.total_block_count)
        .unwrap_or(0);

    if total == 0 && expected_size > 0 {
        return Err(StoreError::MissingBlock {
            file_name,
            index: 0,
        });
    }

    for (position, block) in blocks.iter().enumerate() {
        let position = position as u32;
        if block.info.index < position {
            return Err(StoreError::Corrupted(format!(
                "block {} of {} supplied twice",
                block.info.index, file_name
            )));
        }
        if block.info.index > position {
            return Err(StoreError::MissingBlock {
                file_name,
                index: position,
            });
        }
    }

    let supplied = blocks.len() as u32;
    if supplied < total {
        return Err(StoreError::MissingBlock {
            file_name,
            index: supplied,
        });
    }
    if supplied > total {
        return Err(StoreError::Corrupted(format!(
            "{} blocks supplied for {} but total is {}",
            supplied, file_name, total
        )));
    }

    let mut data: Vec<u8> = blocks.into_iter().flat_map(|block| block.data).collect();

    if (data.len() as u64) < expected_size {
        return Err(StoreError::Corrupted(format!(
            "reassembled {} bytes of {}, expected {}",
            data.len(),
            file_name,
            expected_size
        )));
    }
    data.truncate(expected_size as usize);

    Ok(data)
}

/// Hex-encoded SHA-256 of the payload.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
