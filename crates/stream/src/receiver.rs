//! Subscription results and the receivers that consume them

use std::sync::Arc;

use relay_events::{Envelope, Error, Miniblock, StreamId, SyncCookie};
use serde::{Deserialize, Serialize};

/// One message for a subscriber of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUpdate {
    pub stream_id: StreamId,
    /// New envelopes; on reset, the whole minipool
    pub events: Vec<Envelope>,
    /// Sealed blocks since the last snapshot; only set on reset
    pub miniblocks: Vec<Miniblock>,
    /// Position after this update
    pub next_sync_cookie: SyncCookie,
    /// Position before this update, when known
    pub prev_sync_cookie: Option<SyncCookie>,
    /// The client must drop its local state and rebuild from this update
    pub sync_reset: bool,
}

/// Sink for stream updates.
///
/// Both callbacks run while the stream's lock is held and must not block:
/// deliver best effort and treat a full buffer as an error of the receiver's
/// own session.
pub trait SyncResultReceiver: Send + Sync + 'static {
    fn on_update(&self, update: StreamUpdate);

    /// Terminal error for this subscription
    fn on_sync_error(&self, err: Error);
}

pub(crate) fn same_receiver(
    a: &Arc<dyn SyncResultReceiver>,
    b: &Arc<dyn SyncResultReceiver>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
