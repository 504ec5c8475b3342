use crate::balancer::types::FileMeta;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// What a node holds for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub total_block_count: u32,
    /// Size of the whole logical file, when the balancer told us.
    pub file_size: Option<u64>,
    /// Block index -> stored length in bytes.
    pub blocks: BTreeMap<u32, u64>,
}

impl CatalogEntry {
    pub fn new(total_block_count: u32, file_size: Option<u64>) -> Self {
        Self {
            total_block_count,
            file_size,
            blocks: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, index: u32, len: u64) {
        self.blocks.insert(index, len);
        if index >= self.total_block_count {
            self.total_block_count = index + 1;
        }
    }

    pub fn indexes(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    pub fn stored_bytes(&self) -> u64 {
        self.blocks.values().sum()
    }

    fn to_file_meta(&self, file_name: &str) -> FileMeta {
        // Holding every block means the stored length is the file length.
        let file_size = self.file_size.or_else(|| {
            (self.blocks.len() as u32 == self.total_block_count).then(|| self.stored_bytes())
        });

        FileMeta {
            file_name: file_name.to_string(),
            indexes: self.indexes(),
            total_block_count: self.total_block_count,
            file_size,
        }
    }
}

/// In-memory index of the blocks physically present on this node.
#[derive(Debug, Default)]
pub struct NodeCatalog {
    files: DashMap<String, CatalogEntry>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_file(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    pub fn contains_block(&self, file_name: &str, index: u32) -> bool {
        self.files
            .get(file_name)
            .map(|entry| entry.blocks.contains_key(&index))
            .unwrap_or(false)
    }

    pub fn get(&self, file_name: &str) -> Option<CatalogEntry> {
        self.files.get(file_name).map(|entry| entry.value().clone())
    }

    pub fn insert_file(&self, file_name: &str, entry: CatalogEntry) {
        self.files.insert(file_name.to_string(), entry);
    }

    pub fn remove_file(&self, file_name: &str) -> Option<CatalogEntry> {
        self.files.remove(file_name).map(|(_, entry)| entry)
    }

    pub fn insert_block(&self, file_name: &str, index: u32, len: u64, total_block_count: u32) {
        let mut entry = self
            .files
            .entry(file_name.to_string())
            .or_insert_with(|| CatalogEntry::new(total_block_count, None));
        if total_block_count > entry.total_block_count {
            entry.total_block_count = total_block_count;
        }
        entry.insert(index, len);
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn block_count(&self) -> usize {
        self.files.iter().map(|entry| entry.value().blocks.len()).sum()
    }

    /// One registration record per file, sorted by name.
    pub fn file_metas(&self) -> Vec<FileMeta> {
        let mut metas: Vec<FileMeta> = self
            .files
            .iter()
            .map(|entry| entry.value().to_file_meta(entry.key()))
            .collect();
        metas.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        metas
    }
}
