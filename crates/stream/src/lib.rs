//! Streams and the per-node stream cache
//!
//! A [`Stream`] serializes every mutation of one stream behind its own lock
//! and treats a successful storage write as the commit point. The
//! [`StreamCache`] maps stream ids to streams, and the
//! [`MiniblockProducer`] seals pending events on a timer.

pub mod cache;
pub mod config;
pub mod producer;
pub mod receiver;
pub mod stream;

pub use cache::{CacheCleanupResult, StreamCache};
pub use config::StreamCacheConfig;
pub use producer::MiniblockProducer;
pub use receiver::{StreamUpdate, SyncResultReceiver};
pub use stream::{Stream, StreamParams};
