use super::registry::{PlacementRegistry, UploadPlan};
use super::transport::NodeTransport;
use super::types::{FileMeta, NodeFileInfo, NodeLoad};
use crate::blocks::{
    Block, PartialFile, SourceFile, compute_checksum, join, split, validate_file_name,
};
use crate::config::BalancerConfig;
use crate::error::{Result, StoreError};
use crate::state::State;

use std::sync::Arc;
use tokio::task::JoinSet;

/// Drives uploads, downloads, overwrites and deletes across the registered nodes.
pub struct BalancerService {
    registry: PlacementRegistry,
    transport: Arc<dyn NodeTransport>,
    block_size: usize,
}

impl BalancerService {
    pub fn new(config: &BalancerConfig, transport: Arc<dyn NodeTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: PlacementRegistry::new(),
            transport,
            block_size: config.block_size,
        })
    }

    pub fn registry(&self) -> &PlacementRegistry {
        &self.registry
    }

    /// Returns the number of nodes known after the registration.
    pub fn register_node(&self, node_url: &str, files: &[FileMeta]) -> usize {
        self.registry.register_node(node_url, files)
    }

    /// Splits a file and pushes each node its share.
    ///
    /// An existing name without `force_overwrite` is skipped: no node is contacted
    /// and the registry is left alone. Node failures do not abort the remaining
    /// pushes; they are reported in the returned state and the failed shares are
    /// not routed to.
    pub async fn upload_file(&self, file: SourceFile, force_overwrite: bool) -> Result<State> {
        validate_file_name(&file.name)?;

        let file_name = file.name.clone();
        let file_size = file.data.len() as u64;
        let blocks = split(&file, self.block_size)?;
        let total_block_count = blocks.len() as u32;

        let mut entry = NodeFileInfo::new(total_block_count, Some(file_size));
        entry.content_type = file.content_type.clone();
        entry.checksum = Some(compute_checksum(&file.data));

        let reservation = match self.registry.plan_upload(&file_name, entry, force_overwrite)? {
            UploadPlan::Skipped => {
                tracing::info!("Upload of {} skipped, file already exists", file_name);
                return Ok(State::success().with_message(format!(
                    "File {} already exists, upload skipped",
                    file_name
                )));
            }
            UploadPlan::Planned(reservation) => reservation,
        };

        let mut slots: Vec<Option<Block>> = blocks.into_iter().map(Some).collect();
        let mut state = State::success();
        let mut failed_hosts = Vec::new();

        for (host, indexes) in reservation.assignments() {
            let partial = PartialFile {
                file_name: file_name.clone(),
                total_block_count,
                file_size: Some(file_size),
                blocks: indexes
                    .iter()
                    .filter_map(|index| slots.get_mut(*index as usize).and_then(Option::take))
                    .collect(),
            };

            match self.transport.save_file(host, partial, force_overwrite).await {
                Ok(node_state) => {
                    if !node_state.is_success() {
                        tracing::warn!("Node {} refused blocks of {}", host, file_name);
                        failed_hosts.push(host.clone());
                    }
                    state += node_state;
                }
                Err(e) => {
                    tracing::warn!("Push of {} to {} failed: {}", file_name, host, e);
                    failed_hosts.push(host.clone());
                    state += State::from_error(&e);
                }
            }
        }

        if let Some(previous) = reservation.previous() {
            for host in previous.hosts() {
                if reservation
                    .assignments()
                    .iter()
                    .any(|(assigned, _)| *assigned == host)
                {
                    continue;
                }
                // Leftovers of the replaced version; a failure here is only reported.
                match self.transport.delete_file(&host, &file_name).await {
                    Ok(node_state) if node_state.is_success() => {}
                    Ok(node_state) => {
                        for message in node_state.messages() {
                            state.push_message(format!("Cleanup on {}: {}", host, message));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Cleanup of {} on {} failed: {}", file_name, host, e);
                        state.push_message(format!("Cleanup on {} failed: {}", host, e));
                    }
                }
            }
        }

        reservation.commit(&failed_hosts);
        tracing::info!(
            "Uploaded {} ({} bytes, {} blocks, {} nodes failed)",
            file_name,
            file_size,
            total_block_count,
            failed_hosts.len()
        );
        Ok(state)
    }

    /// Fetches every block and reassembles the file.
    ///
    /// The first missing or unreachable block fails the whole download. When a
    /// checksum was recorded at upload the reassembled payload must match it.
    pub async fn download_file(&self, file_name: &str) -> Result<SourceFile> {
        let entry = self
            .registry
            .get(file_name)
            .ok_or_else(|| StoreError::NotFound(file_name.to_string()))?;

        let mut blocks = Vec::with_capacity(entry.block_count as usize);
        for index in 0..entry.block_count {
            blocks.push(self.fetch_block(file_name, &entry, index).await?);
        }

        let expected_size = entry
            .file_size
            .unwrap_or_else(|| blocks.iter().map(|block| block.data.len() as u64).sum());
        let data = join(blocks, expected_size)?;

        if let Some(expected) = &entry.checksum {
            let actual = compute_checksum(&data);
            if *expected != actual {
                tracing::error!("Checksum mismatch on {}", file_name);
                return Err(StoreError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tracing::debug!("Downloaded {} ({} bytes)", file_name, data.len());
        Ok(SourceFile {
            name: file_name.to_string(),
            content_type: entry.content_type,
            data,
        })
    }

    /// `Ok(None)` when the file or the index is unknown.
    pub async fn download_block(&self, file_name: &str, index: u32) -> Result<Option<Block>> {
        let Some(entry) = self.registry.get(file_name) else {
            return Ok(None);
        };
        let Some(host) = entry.preferred_holder(index) else {
            return Ok(None);
        };

        let block = self.transport.download_block(host, file_name, index).await?;
        Ok(block.map(|block| with_registry_total(block, &entry)))
    }

    /// Fetches the requested blocks in order; fails on the first one that is missing.
    pub async fn download_blocks(&self, file_name: &str, indexes: &[u32]) -> Result<Vec<Block>> {
        let entry = self
            .registry
            .get(file_name)
            .ok_or_else(|| StoreError::NotFound(file_name.to_string()))?;

        let mut blocks = Vec::with_capacity(indexes.len());
        for index in indexes {
            blocks.push(self.fetch_block(file_name, &entry, *index).await?);
        }
        Ok(blocks)
    }

    async fn fetch_block(&self, file_name: &str, entry: &NodeFileInfo, index: u32) -> Result<Block> {
        let missing = || StoreError::MissingBlock {
            file_name: file_name.to_string(),
            index,
        };

        let host = entry.preferred_holder(index).ok_or_else(missing)?;
        match self.transport.download_block(host, file_name, index).await? {
            Some(block) => Ok(with_registry_total(block, entry)),
            None => {
                tracing::warn!("{} does not have block {} of {}", host, index, file_name);
                Err(missing())
            }
        }
    }

    /// Replaces one block on every node holding it.
    ///
    /// An unknown file or index fails without contacting any node.
    pub async fn overwrite_block(&self, file_name: &str, data: Vec<u8>, index: u32) -> State {
        let Some(entry) = self.registry.get(file_name) else {
            return State::failure(format!("File {} not found", file_name));
        };

        let holders: Vec<String> = entry
            .holders(index)
            .into_iter()
            .map(|node| node.host_name.clone())
            .collect();
        if holders.is_empty() {
            return State::failure(format!("Block {} of {} not found", index, file_name));
        }

        let mut state = State::success();
        for host in &holders {
            let block = Block::new(file_name, index, entry.block_count, data.clone());
            match self.transport.add_or_replace_block(host, block, true).await {
                Ok(node_state) => state += node_state,
                Err(e) => {
                    tracing::warn!("Overwrite of {} on {} failed: {}", file_name, host, e);
                    state += State::from_error(&e);
                }
            }
        }

        self.registry.mark_block_overwritten(file_name);
        tracing::info!(
            "Overwrote block {} of {} on {} nodes",
            index,
            file_name,
            holders.len()
        );
        state
    }

    /// Deletes a file from every node referencing it, then from the registry.
    ///
    /// Node deletes run concurrently. The registry entry is removed even when some
    /// of them fail; those failures are reported in the returned state. An entry
    /// republished by an upload while the deletes ran is kept. Deleting an unknown
    /// file succeeds with a warning.
    pub async fn delete_file(&self, file_name: &str) -> State {
        let Some(entry) = self.registry.get(file_name) else {
            tracing::warn!("Delete of unknown file {}", file_name);
            return State::success().with_message(format!("File {} not found", file_name));
        };

        let mut tasks = JoinSet::new();
        for host in entry.hosts() {
            let transport = self.transport.clone();
            let file_name = file_name.to_string();
            tasks.spawn(async move {
                match transport.delete_file(&host, &file_name).await {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::warn!("Delete of {} on {} failed: {}", file_name, host, e);
                        State::from_error(&e)
                    }
                }
            });
        }

        let mut state = State::success();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(node_state) => state += node_state,
                Err(e) => state += State::failure(format!("Delete task failed: {}", e)),
            }
        }

        if !self.registry.remove_if_unchanged(file_name, &entry) {
            tracing::warn!("{} was uploaded again during delete, keeping new entry", file_name);
            state.push_message(format!(
                "File {} was uploaded again during delete, new version kept",
                file_name
            ));
        }
        tracing::info!("Deleted {} (success={})", file_name, state.is_success());
        state
    }

    pub fn search(&self, file_name: &str) -> bool {
        self.registry.contains(file_name)
    }

    pub fn node_loads(&self) -> Vec<NodeLoad> {
        self.registry.node_loads()
    }
}

/// The registry's block count is authoritative for reassembly.
fn with_registry_total(mut block: Block, entry: &NodeFileInfo) -> Block {
    block.info.total_block_count = entry.block_count;
    block
}
