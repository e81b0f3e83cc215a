//! Request and response types of the node-facing and node-to-node RPCs

use relay_events::{Address, Envelope, Miniblock, StreamId, StreamView, SyncCookie};
use relay_stream::StreamUpdate;
use serde::{Deserialize, Serialize};

/// Client-visible state of a stream: everything after its last snapshot and
/// the cookie to resume from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamAndCookie {
    /// Pending minipool events
    pub events: Vec<Envelope>,
    /// Sealed blocks starting at the last snapshot block
    pub miniblocks: Vec<Miniblock>,
    pub next_sync_cookie: SyncCookie,
}

impl StreamAndCookie {
    pub fn from_view(view: &StreamView, node_address: Address) -> Self {
        Self {
            events: view.minipool_envelopes(),
            miniblocks: view.miniblocks_from_last_snapshot(),
            next_sync_cookie: view.sync_cookie(node_address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    pub stream_id: StreamId,
    /// Genesis events, inception first
    pub events: Vec<Envelope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStreamResponse {
    pub stream: StreamAndCookie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetStreamRequest {
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetStreamResponse {
    pub stream: StreamAndCookie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMiniblocksRequest {
    pub stream_id: StreamId,
    pub from_inclusive: u64,
    pub to_exclusive: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMiniblocksResponse {
    pub miniblocks: Vec<Miniblock>,
    /// The range starts at the genesis block
    pub terminus: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEventRequest {
    pub stream_id: StreamId,
    pub event: Envelope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEventResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStreamsRequest {
    pub sync_pos: Vec<SyncCookie>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    /// First message of a session; carries only the sync id
    New,
    /// Updates for one stream
    Update,
    /// Session was cancelled cleanly
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStreamsResponse {
    pub sync_id: String,
    pub sync_op: SyncOp,
    pub stream: Option<StreamUpdate>,
}

impl SyncStreamsResponse {
    pub fn new_sync(sync_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id.into(),
            sync_op: SyncOp::New,
            stream: None,
        }
    }

    pub fn update(sync_id: impl Into<String>, update: StreamUpdate) -> Self {
        Self {
            sync_id: sync_id.into(),
            sync_op: SyncOp::Update,
            stream: Some(update),
        }
    }

    pub fn close(sync_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id.into(),
            sync_op: SyncOp::Close,
            stream: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSyncRequest {
    pub sync_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSyncResponse {}

/// Node to node: store a sealed genesis block for a replicated stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocateStreamRequest {
    pub stream_id: StreamId,
    pub miniblock: Miniblock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocateStreamResponse {
    pub sync_cookie: SyncCookie,
}

/// Node to node: append an event accepted by another replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEventReceivedRequest {
    pub stream_id: StreamId,
    pub event: Envelope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEventReceivedResponse {}
