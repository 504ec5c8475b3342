use super::catalog::{CatalogEntry, NodeCatalog};
use super::layout::BlockLayout;
use crate::balancer::types::FileMeta;
use crate::blocks::{Block, PartialFile, validate_file_name};
use crate::config::NodeConfig;
use crate::error::{Result, StoreError};
use crate::state::State;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Block storage operations of a single node.
pub struct NodeAgent {
    node_name: String,
    layout: BlockLayout,
    catalog: NodeCatalog,
    /// One lock per file name; held across the disk writes and the catalog update.
    file_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NodeAgent {
    /// Prepares the data directory and establishes the catalog.
    ///
    /// With `clear_on_start` the directory is wiped and the node starts empty;
    /// otherwise the catalog is rebuilt by scanning what is already on disk.
    pub async fn open(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let layout = BlockLayout::new(config.data_path());
        layout.ensure_root().await?;

        let catalog = NodeCatalog::new();
        if config.clear_on_start {
            layout.clear().await?;
            tracing::info!("Cleared data directory {:?}", layout.data_path());
        } else {
            for (file_name, entry) in layout.scan().await? {
                catalog.insert_file(&file_name, entry);
            }
            tracing::info!(
                "Rebuilt catalog from {:?}: {} files, {} blocks",
                layout.data_path(),
                catalog.file_count(),
                catalog.block_count()
            );
        }

        Ok(Self {
            node_name: config.node_name.clone(),
            layout,
            catalog,
            file_locks: DashMap::new(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn catalog(&self) -> &NodeCatalog {
        &self.catalog
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn file_metas(&self) -> Vec<FileMeta> {
        self.catalog.file_metas()
    }

    async fn lock_file(&self, file_name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .file_locks
            .entry(file_name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Writes one block, replacing whatever sits at the same index.
    pub async fn write_block(&self, block: &Block) -> State {
        if let Err(e) = validate_file_name(&block.info.file_name) {
            return e.into();
        }
        let _guard = self.lock_file(&block.info.file_name).await;
        self.write_block_locked(block).await
    }

    async fn write_block_locked(&self, block: &Block) -> State {
        match self.layout.write_block(block).await {
            Ok(overwritten) => {
                self.catalog.insert_block(
                    &block.info.file_name,
                    block.info.index,
                    block.data.len() as u64,
                    block.info.total_block_count,
                );
                let mut state = State::success();
                if overwritten {
                    state.push_message(format!(
                        "Block #{} of {} has been overwritten",
                        block.info.index, block.info.file_name
                    ));
                }
                state
            }
            Err(e) => {
                tracing::error!(
                    "Failed to write block {} of {}: {}",
                    block.info.index,
                    block.info.file_name,
                    e
                );
                e.into()
            }
        }
    }

    /// Stores a node's share of a file.
    ///
    /// A known file is only replaced when `force_overwrite` is set; its directory is
    /// removed first and the catalog entry is published only once every block of the
    /// incoming share is on disk.
    pub async fn add_or_replace_file(&self, partial: PartialFile, force_overwrite: bool) -> State {
        if let Err(e) = validate_file_name(&partial.file_name) {
            return e.into();
        }
        let _guard = self.lock_file(&partial.file_name).await;
        self.add_or_replace_file_locked(partial, force_overwrite).await
    }

    async fn add_or_replace_file_locked(
        &self,
        partial: PartialFile,
        force_overwrite: bool,
    ) -> State {
        let file_name = partial.file_name.clone();

        if let Some(stray) = partial
            .blocks
            .iter()
            .find(|block| block.info.file_name != file_name)
        {
            return State::failure(format!(
                "Block {} belongs to {}, not {}",
                stray.info.index, stray.info.file_name, file_name
            ));
        }

        let mut state = State::success();

        if self.catalog.contains_file(&file_name) {
            if !force_overwrite {
                return StoreError::Conflict(format!("File {} already exists", file_name)).into();
            }
            self.catalog.remove_file(&file_name);
            state.push_message(format!("File {} replaced", file_name));
        }

        // Leftovers of an unknown or replaced file never mix with the new share.
        if let Err(e) = self.layout.remove_file_dir(&file_name).await {
            return state + State::from_error(&e);
        }
        if let Err(e) = self.layout.create_file_dir(&file_name).await {
            return state + State::from_error(&e);
        }

        let total_block_count = partial.total_block_count.max(
            partial
                .blocks
                .iter()
                .map(|block| block.info.index + 1)
                .max()
                .unwrap_or(0),
        );
        if let Err(e) = self
            .layout
            .write_manifest(&file_name, total_block_count, partial.file_size)
            .await
        {
            self.discard_file_dir(&file_name).await;
            return state + State::from_error(&e);
        }

        let mut entry = CatalogEntry::new(total_block_count, partial.file_size);
        for block in &partial.blocks {
            match self.layout.write_block(block).await {
                Ok(overwritten) => {
                    if overwritten {
                        state.push_message(format!(
                            "Block #{} of {} has been overwritten",
                            block.info.index, file_name
                        ));
                    }
                    entry.insert(block.info.index, block.data.len() as u64);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to store block {} of {}: {}",
                        block.info.index,
                        file_name,
                        e
                    );
                    self.discard_file_dir(&file_name).await;
                    return state + State::from_error(&e);
                }
            }
        }

        tracing::info!(
            "Stored {} blocks of {} on {}",
            entry.blocks.len(),
            file_name,
            self.node_name
        );
        self.catalog.insert_file(&file_name, entry);
        state
    }

    /// Adds one block, or replaces it when `allow_overwrite` is set.
    ///
    /// A block of a file this node has never seen creates the file.
    pub async fn add_or_replace_block(&self, block: Block, allow_overwrite: bool) -> State {
        if let Err(e) = validate_file_name(&block.info.file_name) {
            return e.into();
        }
        let _guard = self.lock_file(&block.info.file_name).await;

        if !self.catalog.contains_file(&block.info.file_name) {
            let partial = PartialFile {
                file_name: block.info.file_name.clone(),
                total_block_count: block.info.total_block_count,
                file_size: None,
                blocks: vec![block],
            };
            return self.add_or_replace_file_locked(partial, false).await;
        }

        if self
            .catalog
            .contains_block(&block.info.file_name, block.info.index)
            && !allow_overwrite
        {
            return StoreError::Conflict(format!(
                "Block {} of {} already exists",
                block.info.index, block.info.file_name
            ))
            .into();
        }

        self.write_block_locked(&block).await
    }

    /// Forgets a file and removes its directory.
    ///
    /// Deleting a file the catalog does not know is not an error; the state carries
    /// a warning instead.
    pub async fn delete_file(&self, file_name: &str) -> State {
        if let Err(e) = validate_file_name(file_name) {
            return e.into();
        }
        let _guard = self.lock_file(file_name).await;

        let mut state = State::success();
        if self.catalog.remove_file(file_name).is_none() {
            tracing::warn!("Delete of unregistered file {} on {}", file_name, self.node_name);
            state.push_message(format!(
                "File {} not registered on {}",
                file_name, self.node_name
            ));
        }

        match self.layout.remove_file_dir(file_name).await {
            Ok(true) => tracing::info!("Deleted {} from {}", file_name, self.node_name),
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Failed to delete directory of {}: {}", file_name, e);
                state += State::from_error(&e);
            }
        }
        state
    }

    /// Removes what a failed write left behind. Returns whether the directory is gone.
    pub(super) async fn discard_file_dir(&self, file_name: &str) -> bool {
        match self.layout.remove_file_dir(file_name).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Failed to clean up partial write of {} on {}: {}",
                    file_name,
                    self.node_name,
                    e
                );
                false
            }
        }
    }

    /// Returns the stored bytes of a block, or `None` when this node does not hold it.
    pub async fn read_block(&self, file_name: &str, index: u32) -> Result<Option<Block>> {
        validate_file_name(file_name)?;

        let Some(entry) = self.catalog.get(file_name) else {
            return Ok(None);
        };
        if !entry.blocks.contains_key(&index) {
            return Ok(None);
        }

        match self.layout.read_block(file_name, index).await? {
            Some(data) => Ok(Some(Block::new(
                file_name,
                index,
                entry.total_block_count,
                data,
            ))),
            None => {
                tracing::warn!(
                    "Catalog lists block {} of {} but it is missing on disk",
                    index,
                    file_name
                );
                Ok(None)
            }
        }
    }
}
