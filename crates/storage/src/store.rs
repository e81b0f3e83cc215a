//! Stream storage trait and its error type

use async_trait::async_trait;
use bytes::Bytes;
use relay_events::{Error, ErrorKind, StreamId};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Stream was already created
    #[error("Stream already exists: {0}")]
    AlreadyExists(String),

    /// Stream was never created
    #[error("Stream not found: {0}")]
    NotFound(String),

    /// Caller's generation or slot expectation is stale
    #[error("Storage conflict: {0}")]
    Conflict(String),

    /// Persisted data failed validation
    #[error("Corrupt stream data: {0}")]
    Corrupt(String),

    /// Storage backend error
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let kind = match &err {
            StorageError::AlreadyExists(_) => ErrorKind::StreamAlreadyExists,
            StorageError::NotFound(_) => ErrorKind::StreamNotFound,
            StorageError::Conflict(_) => ErrorKind::Conflict,
            StorageError::Corrupt(_) | StorageError::Backend(_) => ErrorKind::Internal,
        };
        Error::with_context(kind, err.to_string())
    }
}

/// Sealed blocks from (a few generations before) the latest snapshot plus the
/// pending minipool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStreamResult {
    /// Number of the first block in `miniblocks`
    pub start_miniblock_num: u64,
    pub miniblocks: Vec<Bytes>,
    /// Pending envelopes in slot order
    pub minipool_envelopes: Vec<Bytes>,
}

/// Durable per-stream persistence.
///
/// All operations on one stream id must be linearizable with respect to each
/// other; callers treat a successful write as the commit point.
#[async_trait]
pub trait StreamStore: Clone + Send + Sync + 'static {
    /// Persist the genesis miniblock of a new stream
    async fn create_stream(&self, stream_id: &StreamId, genesis_miniblock: Bytes)
    -> StorageResult<()>;

    /// Append one envelope to the minipool at `expected_slot` of
    /// `expected_generation`
    async fn write_event(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_slot: u64,
        envelope: Bytes,
    ) -> StorageResult<()>;

    /// Atomically seal block `expected_generation`, replace the minipool with
    /// `new_minipool`, and advance the generation
    async fn write_block(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_minipool_size: u64,
        miniblock: Bytes,
        is_snapshot: bool,
        new_minipool: Vec<Bytes>,
    ) -> StorageResult<()>;

    /// Blocks from `max_generations_back` before the latest snapshot block
    /// through the last sealed block, and the minipool
    async fn read_from_last_snapshot(
        &self,
        stream_id: &StreamId,
        max_generations_back: u64,
    ) -> StorageResult<ReadStreamResult>;

    /// Sealed blocks in `[from_inclusive, to_exclusive)`, clipped to what exists
    async fn read_miniblocks(
        &self,
        stream_id: &StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> StorageResult<Vec<Bytes>>;
}

/// Implement StreamStore for Arc<T> where T: StreamStore
#[async_trait]
impl<T: StreamStore> StreamStore for std::sync::Arc<T> {
    async fn create_stream(&self, stream_id: &StreamId, genesis_miniblock: Bytes)
    -> StorageResult<()> {
        (**self).create_stream(stream_id, genesis_miniblock).await
    }

    async fn write_event(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_slot: u64,
        envelope: Bytes,
    ) -> StorageResult<()> {
        (**self)
            .write_event(stream_id, expected_generation, expected_slot, envelope)
            .await
    }

    async fn write_block(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_minipool_size: u64,
        miniblock: Bytes,
        is_snapshot: bool,
        new_minipool: Vec<Bytes>,
    ) -> StorageResult<()> {
        (**self)
            .write_block(
                stream_id,
                expected_generation,
                expected_minipool_size,
                miniblock,
                is_snapshot,
                new_minipool,
            )
            .await
    }

    async fn read_from_last_snapshot(
        &self,
        stream_id: &StreamId,
        max_generations_back: u64,
    ) -> StorageResult<ReadStreamResult> {
        (**self)
            .read_from_last_snapshot(stream_id, max_generations_back)
            .await
    }

    async fn read_miniblocks(
        &self,
        stream_id: &StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> StorageResult<Vec<Bytes>> {
        (**self)
            .read_miniblocks(stream_id, from_inclusive, to_exclusive)
            .await
    }
}
