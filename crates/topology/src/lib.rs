//! Stream placement for relay nodes
//!
//! This crate provides:
//! - `StreamNodes`, the ordered replica set of one stream
//! - The `PlacementAdaptor` contract (`resolve`)
//! - Deterministic hash-based placement
//! - `Topology`, which binds a placement to the local node

pub mod error;
pub mod nodes;
pub mod placement;

pub use error::{TopologyError, TopologyResult};
pub use nodes::{NodeTarget, StreamNodes};
pub use placement::{HashPlacement, PlacementAdaptor, Topology};
