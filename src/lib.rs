//! Distributed Block Store Library
//!
//! Files are cut into fixed-size blocks, spread over independent storage nodes and
//! glued back together on read. This crate holds both roles; the binary
//! (`main.rs`) starts one of them.
//!
//! ## Architecture Modules
//!
//! - **`balancer`**: the coordinator. Keeps the file -> block -> node registry,
//!   decides placement and drives uploads, downloads, overwrites and deletes.
//! - **`node`**: a storage agent. Persists blocks under a local data root, keeps an
//!   in-memory catalog of them and registers with the balancer at startup.
//! - **`blocks`**: block types and the split/join codec shared by both roles.
//! - **`state`**: the combinable success-plus-messages result of multi-node operations.
//! - **`config`** / **`error`**: runtime settings and the crate error type.

pub mod balancer;
pub mod blocks;
pub mod config;
pub mod error;
pub mod node;
pub mod state;
