//! Event model and stream state for relay nodes
//!
//! This crate is pure and synchronous: it parses signed envelopes, orders the
//! event DAG, folds events into per-stream-kind snapshots, seals miniblocks,
//! and maintains the copy-on-write [`StreamView`] that the async layers swap
//! in and out.

pub mod config;
pub mod cookie;
pub mod dag;
pub mod error;
pub mod event;
pub mod hash;
pub mod miniblock;
pub mod minipool;
pub mod payload;
pub mod snapshot;
pub mod stream_id;
pub mod view;
pub mod wallet;

pub use config::StreamConfig;
pub use cookie::SyncCookie;
pub use error::{Error, ErrorContext, ErrorKind, RelayResult};
pub use event::{
    Envelope, Event, ParsedEvent, make_envelope, make_parsed_event, parse, parse_many,
};
pub use hash::EventHash;
pub use miniblock::{Miniblock, MiniblockHeader, MiniblockInfo, make_genesis_header, make_miniblock};
pub use minipool::Minipool;
pub use payload::{Inception, Payload, StreamSettings};
pub use snapshot::{Snapshot, SnapshotContent};
pub use stream_id::{StreamId, StreamKind};
pub use view::{MiniblockProposal, StreamView, StreamViewStats};
pub use wallet::{Address, Wallet};
