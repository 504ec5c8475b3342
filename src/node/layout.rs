//! On-disk block layout.
//!
//! ```text
//! <data_path>/
//!   <file_name>/
//!     .file_meta.json     total block count and file size
//!     block_0
//!     block_1
//! ```
//!
//! Anything inside a file directory whose name does not parse as `block_<index>`
//! is ignored when the catalog is rebuilt.

use super::catalog::CatalogEntry;
use crate::blocks::{Block, validate_file_name};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const BLOCK_PREFIX: &str = "block_";
pub const FILE_META_NAME: &str = ".file_meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileManifest {
    total_block_count: u32,
    file_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BlockLayout {
    data_path: PathBuf,
}

impl BlockLayout {
    pub fn new(data_path: PathBuf) -> Self {
        Self { data_path }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn file_dir(&self, file_name: &str) -> PathBuf {
        self.data_path.join(file_name)
    }

    pub fn block_path(&self, file_name: &str, index: u32) -> PathBuf {
        self.file_dir(file_name).join(block_file_name(index))
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.data_path).await?;
        Ok(())
    }

    /// Removes everything under the data path, keeping the directory itself.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.data_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    pub async fn create_file_dir(&self, file_name: &str) -> Result<()> {
        fs::create_dir_all(self.file_dir(file_name)).await?;
        Ok(())
    }

    /// Recursively deletes a file's directory. Returns whether it existed.
    pub async fn remove_file_dir(&self, file_name: &str) -> Result<bool> {
        match fs::remove_dir_all(self.file_dir(file_name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_manifest(
        &self,
        file_name: &str,
        total_block_count: u32,
        file_size: Option<u64>,
    ) -> Result<()> {
        let manifest = FileManifest {
            total_block_count,
            file_size,
        };
        let bytes = serde_json::to_vec(&manifest)?;
        fs::write(self.file_dir(file_name).join(FILE_META_NAME), bytes).await?;
        Ok(())
    }

    /// Writes a block through a temporary sibling and renames it into place.
    ///
    /// Returns `true` when an existing block at the same index was replaced.
    pub async fn write_block(&self, block: &Block) -> Result<bool> {
        let dir = self.file_dir(&block.info.file_name);
        fs::create_dir_all(&dir).await?;

        let final_path = dir.join(block_file_name(block.info.index));
        let existed = fs::try_exists(&final_path).await?;

        let temp_path = dir.join(format!(
            ".{}.{}.tmp",
            block_file_name(block.info.index),
            uuid::Uuid::new_v4()
        ));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&block.data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            "Stored block {} of {} ({} bytes)",
            block.info.index,
            block.info.file_name,
            block.data.len()
        );
        Ok(existed)
    }

    /// Reads exactly the stored bytes of a block; `None` if the file is absent.
    pub async fn read_block(&self, file_name: &str, index: u32) -> Result<Option<Vec<u8>>> {
        match fs::read(self.block_path(file_name, index)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds catalog entries from the directory tree.
    pub async fn scan(&self) -> Result<Vec<(String, CatalogEntry)>> {
        let mut files = Vec::new();
        let mut dirs = fs::read_dir(&self.data_path).await?;

        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let Some(file_name) = dir.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_file_name(&file_name).is_err() {
                tracing::warn!("Skipping unexpected directory {:?}", dir.path());
                continue;
            }

            let manifest = self.read_manifest(&file_name).await;
            let mut entry = CatalogEntry::new(
                manifest.as_ref().map(|m| m.total_block_count).unwrap_or(0),
                manifest.and_then(|m| m.file_size),
            );

            let mut blocks = fs::read_dir(dir.path()).await?;
            while let Some(block) = blocks.next_entry().await? {
                let name = block.file_name();
                let Some(index) = name.to_str().and_then(parse_block_index) else {
                    continue;
                };
                let len = block.metadata().await?.len();
                entry.insert(index, len);
            }

            files.push((file_name, entry));
        }

        Ok(files)
    }

    async fn read_manifest(&self, file_name: &str) -> Option<FileManifest> {
        let path = self.file_dir(file_name).join(FILE_META_NAME);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest {:?}: {}", path, e);
                None
            }
        }
    }
}

pub fn block_file_name(index: u32) -> String {
    format!("{}{}", BLOCK_PREFIX, index)
}

/// Inverse of [`block_file_name`]; anything else is not a block, including
/// indexes with leading zeros.
pub fn parse_block_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(BLOCK_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse().ok()?;
    (block_file_name(index) == name).then_some(index)
}
