//! Blocks & Codec Module
//!
//! A logical file is cut into fixed-size, index-ordered blocks before it is spread
//! across the storage nodes, and glued back together on read.
//!
//! ## Core Concepts
//! - **Block**: a contiguous slice of a file's bytes, addressed by `(file_name, index)`.
//!   Every block but the last carries exactly `block_size` bytes.
//! - **Split / Join**: pure functions in `codec`; `join` refuses to return data when
//!   any index is missing rather than handing back a truncated file.
//! - **Checksum**: a SHA-256 digest of the whole payload, recorded at upload time and
//!   verified after reassembly.

pub mod codec;
pub mod types;

pub use codec::{block_count, compute_checksum, join, split};
pub use types::{Block, BlockInfo, PartialFile, SourceFile, validate_file_name};
