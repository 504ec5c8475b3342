//! Placement Registry
//!
//! Which node holds which block of every file, plus the set of nodes that can
//! receive new blocks.
//!
//! File entries live in a `DashMap`, so mutations of one file are mutually
//! exclusive. Placement additionally takes `placement_lock`: the "least loaded"
//! scan reads every file's shares, and the reservation of the chosen targets has
//! to happen under the same lock or two uploads can both pick the same node.

use super::types::{DEFAULT_PRIORITY, FileMeta, NodeBlockInfo, NodeFileInfo, NodeLoad};
use crate::blocks::validate_file_name;
use crate::error::{Result, StoreError};

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of [`PlacementRegistry::plan_upload`].
#[derive(Debug)]
pub enum UploadPlan<'a> {
    /// The name is taken and overwrite was not requested. Nothing was reserved.
    Skipped,
    Planned(UploadReservation<'a>),
}

/// A name reserved for an upload whose blocks are being pushed.
///
/// Dropping the reservation without [`commit`](Self::commit) releases the name
/// and puts back the entry a forced upload displaced, so an abandoned upload
/// leaves the registry as it found it.
#[derive(Debug)]
pub struct UploadReservation<'a> {
    registry: &'a PlacementRegistry,
    file_name: String,
    assignments: Vec<(String, Vec<u32>)>,
    previous: Option<NodeFileInfo>,
    committed: bool,
}

impl UploadReservation<'_> {
    /// Target host and block indexes for each node, in placement order.
    pub fn assignments(&self) -> &[(String, Vec<u32>)] {
        &self.assignments
    }

    /// Entry that the upload replaces, if any.
    pub fn previous(&self) -> Option<&NodeFileInfo> {
        self.previous.as_ref()
    }

    /// Publishes the upload, dropping the shares of hosts whose push failed.
    pub fn commit(mut self, failed_hosts: &[String]) -> Option<NodeFileInfo> {
        self.committed = true;
        self.registry.commit_upload(&self.file_name, failed_hosts)
    }
}

impl Drop for UploadReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry
                .rollback_upload(&self.file_name, self.previous.take());
        }
    }
}

#[derive(Debug, Clone)]
struct HostLoad {
    host_name: String,
    block_count: usize,
    priority: f64,
}

#[derive(Debug, Default)]
pub struct PlacementRegistry {
    files: DashMap<String, NodeFileInfo>,
    /// Uploads whose blocks are being pushed. Counted by the load scan but not
    /// visible to readers until committed.
    pending: DashMap<String, NodeFileInfo>,
    /// Registered hosts and their priority.
    nodes: DashMap<String, u32>,
    placement_lock: Mutex<()>,
    last_revision: AtomicU64,
}

impl PlacementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_placement(&self) -> MutexGuard<'_, ()> {
        self.placement_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records what a node holds.
    ///
    /// The node's previous shares are replaced, not merged: a share under a file it
    /// reports again gets the newly reported indexes, and shares under files it no
    /// longer reports are dropped. Returns the number of known nodes.
    pub fn register_node(&self, host_name: &str, files: &[FileMeta]) -> usize {
        let _guard = self.lock_placement();

        self.nodes
            .entry(host_name.to_string())
            .or_insert(DEFAULT_PRIORITY);

        let reported: HashSet<&str> = files
            .iter()
            .filter(|meta| !meta.is_sentinel())
            .map(|meta| meta.file_name.as_str())
            .collect();

        for mut entry in self.files.iter_mut() {
            if !reported.contains(entry.key().as_str()) {
                entry
                    .value_mut()
                    .nodes
                    .retain(|node| node.host_name != host_name);
            }
        }

        for meta in files.iter().filter(|meta| !meta.is_sentinel()) {
            if validate_file_name(&meta.file_name).is_err() {
                tracing::warn!(
                    "Ignoring invalid file name {:?} reported by {}",
                    meta.file_name,
                    host_name
                );
                continue;
            }

            let mut entry = self
                .files
                .entry(meta.file_name.clone())
                .or_insert_with(|| NodeFileInfo::from_meta(meta));
            if entry.file_size.is_none() && entry.checksum.is_none() {
                entry.file_size = meta.file_size;
            }
            entry.nodes.retain(|node| node.host_name != host_name);
            entry
                .nodes
                .push(NodeBlockInfo::new(host_name, meta.indexes.iter().copied()));
        }

        tracing::info!(
            "Registered node {} with {} files ({} nodes known)",
            host_name,
            reported.len(),
            self.nodes.len()
        );
        self.nodes.len()
    }

    /// Registry membership. Uploads still in flight do not count.
    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    pub fn get(&self, file_name: &str) -> Option<NodeFileInfo> {
        self.files.get(file_name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, file_name: &str) -> Option<NodeFileInfo> {
        self.files.remove(file_name).map(|(_, entry)| entry)
    }

    /// Removes the entry only if no upload has republished it since `snapshot`
    /// was read. Returns whether it was removed.
    pub fn remove_if_unchanged(&self, file_name: &str, snapshot: &NodeFileInfo) -> bool {
        let _guard = self.lock_placement();
        self.files
            .remove_if(file_name, |_, current| current.revision == snapshot.revision)
            .is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Chooses a target node for every block of `entry` and reserves them.
    ///
    /// Each block goes to the host with the fewest assigned blocks, then the lowest
    /// mean priority, then the smallest name. Loads are updated after every block,
    /// so a single upload spreads across idle nodes. Blocks for the same host are
    /// batched into one share.
    ///
    /// The reservation stays pending until [`UploadReservation::commit`]; a forced
    /// upload hides the entry it replaces for that long.
    pub fn plan_upload(
        &self,
        file_name: &str,
        mut entry: NodeFileInfo,
        force_overwrite: bool,
    ) -> Result<UploadPlan<'_>> {
        let _guard = self.lock_placement();

        if self.pending.contains_key(file_name) {
            return Err(StoreError::Conflict(format!(
                "upload of {} already in progress",
                file_name
            )));
        }
        if self.files.contains_key(file_name) && !force_overwrite {
            return Ok(UploadPlan::Skipped);
        }
        if self.nodes.is_empty() {
            return Err(StoreError::NoCapacity);
        }

        let mut loads = self.host_loads(Some(file_name));
        let mut assignments: Vec<(String, Vec<u32>)> = Vec::new();

        for index in 0..entry.block_count {
            let target = loads
                .iter_mut()
                .min_by(|a, b| {
                    a.block_count
                        .cmp(&b.block_count)
                        .then(a.priority.total_cmp(&b.priority))
                        .then_with(|| a.host_name.cmp(&b.host_name))
                })
                .ok_or(StoreError::NoCapacity)?;
            target.block_count += 1;

            match assignments
                .iter_mut()
                .find(|(host, _)| *host == target.host_name)
            {
                Some((_, indexes)) => indexes.push(index),
                None => assignments.push((target.host_name.clone(), vec![index])),
            }
        }

        entry.nodes = assignments
            .iter()
            .map(|(host, indexes)| NodeBlockInfo::new(host, indexes.iter().copied()))
            .collect();

        let previous = if force_overwrite {
            self.remove(file_name)
        } else {
            None
        };
        self.pending.insert(file_name.to_string(), entry);

        tracing::info!(
            "Planned {} across {} nodes: {:?}",
            file_name,
            assignments.len(),
            assignments
        );
        Ok(UploadPlan::Planned(UploadReservation {
            registry: self,
            file_name: file_name.to_string(),
            assignments,
            previous,
            committed: false,
        }))
    }

    fn commit_upload(&self, file_name: &str, failed_hosts: &[String]) -> Option<NodeFileInfo> {
        let _guard = self.lock_placement();

        let (_, mut entry) = self.pending.remove(file_name)?;
        entry
            .nodes
            .retain(|node| !failed_hosts.contains(&node.host_name));
        entry.revision = self.last_revision.fetch_add(1, Ordering::Relaxed) + 1;
        self.files.insert(file_name.to_string(), entry.clone());
        Some(entry)
    }

    fn rollback_upload(&self, file_name: &str, previous: Option<NodeFileInfo>) {
        let _guard = self.lock_placement();

        self.pending.remove(file_name);
        if let Some(previous) = previous {
            self.files.entry(file_name.to_string()).or_insert(previous);
        }
        tracing::warn!("Upload of {} abandoned, reservation released", file_name);
    }

    /// A block changed in place: the recorded size and digest no longer describe
    /// the payload.
    pub fn mark_block_overwritten(&self, file_name: &str) {
        if let Some(mut entry) = self.files.get_mut(file_name) {
            entry.checksum = None;
            entry.file_size = None;
        }
    }

    /// Assigned block count and mean priority of every known host, sorted by name.
    pub fn node_loads(&self) -> Vec<NodeLoad> {
        let _guard = self.lock_placement();

        let mut loads: Vec<NodeLoad> = self
            .host_loads(None)
            .into_iter()
            .map(|load| NodeLoad {
                host_name: load.host_name,
                block_count: load.block_count,
                priority: load.priority,
            })
            .collect();
        loads.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        loads
    }

    /// Must be called with the placement lock held.
    fn host_loads(&self, exclude: Option<&str>) -> Vec<HostLoad> {
        // host -> (blocks, priority sum, shares)
        let mut totals: HashMap<String, (usize, f64, usize)> = self
            .nodes
            .iter()
            .map(|node| (node.key().clone(), (0, 0.0, 0)))
            .collect();

        let shares = self
            .files
            .iter()
            .chain(self.pending.iter())
            .filter(|entry| Some(entry.key().as_str()) != exclude)
            .flat_map(|entry| entry.value().nodes.clone());

        for share in shares {
            let total = totals.entry(share.host_name).or_insert((0, 0.0, 0));
            total.0 += share.indexes.len();
            total.1 += f64::from(share.priority);
            total.2 += 1;
        }

        totals
            .into_iter()
            .map(|(host_name, (block_count, priority_sum, shares))| {
                let priority = if shares == 0 {
                    self.nodes
                        .get(&host_name)
                        .map(|p| f64::from(*p))
                        .unwrap_or(f64::from(DEFAULT_PRIORITY))
                } else {
                    priority_sum / shares as f64
                };
                HostLoad {
                    host_name,
                    block_count,
                    priority,
                }
            })
            .collect()
    }
}
