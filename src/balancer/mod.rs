//! Balancer Module
//!
//! The coordinator. It owns the only global view of the cluster: which node holds
//! which block of every file. Clients talk only to the balancer; nodes only talk
//! to it once, to register.
//!
//! ## Core Concepts
//! - **Registry**: `file -> [NodeBlockInfo]` plus the set of registered hosts.
//!   Each block lives on exactly one node.
//! - **Placement**: every block goes to the least loaded host (fewest assigned
//!   blocks, then lowest mean priority), re-evaluated after each block.
//! - **Transport**: the [`NodeTransport`] seam; HTTP in production, in-process in tests.
//! - **State**: node results are folded together, so a fan-out that partially fails
//!   reports every failure instead of aborting at the first.

pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;
pub mod types;

pub use registry::{PlacementRegistry, UploadPlan, UploadReservation};
pub use service::BalancerService;
pub use transport::{HttpNodeTransport, NodeTransport};
