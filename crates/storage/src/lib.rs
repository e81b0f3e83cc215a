//! Storage contract for relay streams
//!
//! Each stream persists an append-only sequence of sealed miniblocks plus a
//! single mutable minipool. Backends live in sibling crates.

pub mod store;

pub use store::{ReadStreamResult, StorageError, StorageResult, StreamStore};
