//! Storage Node Module
//!
//! A node owns a local data directory and stores whichever blocks the balancer
//! pushes to it. It knows nothing about placement; it only answers block-level
//! writes, reads and deletes and announces its holdings once at startup.
//!
//! ## Core Concepts
//! - **Layout**: `<root>/<node_name>/<file_name>/block_<index>`. The index is parsed
//!   back out of the name when the catalog is rebuilt from disk.
//! - **Catalog**: an in-memory mirror of what is on disk (`file -> indexes`), used for
//!   existence checks without touching the filesystem.
//! - **Agent**: the operations exposed to the balancer. Every mutation of a file runs
//!   under that file's lock, so disk and catalog never disagree mid-write.
//! - **Registration**: after the catalog is established the node reports its holdings
//!   (or a placeholder when empty) so the balancer can route to it.

pub mod agent;
pub mod catalog;
pub mod handlers;
pub mod layout;
pub mod protocol;
pub mod registration;

pub use agent::NodeAgent;
pub use catalog::{CatalogEntry, NodeCatalog};
pub use layout::BlockLayout;

#[cfg(test)]
mod tests;
