//! In-memory stream storage implementation

use async_trait::async_trait;
use bytes::Bytes;
use relay_events::StreamId;
use relay_storage::{ReadStreamResult, StorageError, StorageResult, StreamStore};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;

/// Everything persisted for one stream
#[derive(Debug, Clone, Default)]
struct StreamRecord {
    /// Sealed blocks, index == miniblock number
    miniblocks: Vec<Bytes>,
    minipool: Vec<Bytes>,
    last_snapshot_num: u64,
}

impl StreamRecord {
    /// Generation of the current minipool
    fn generation(&self) -> u64 {
        self.miniblocks.len() as u64
    }
}

/// In-memory stream storage. A single map lock makes every operation
/// linearizable.
#[derive(Clone)]
pub struct MemoryStreamStore {
    streams: Arc<RwLock<HashMap<StreamId, StreamRecord>>>,
}

impl MemoryStreamStore {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of streams ever created
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(stream_id: &StreamId) -> StorageError {
    StorageError::NotFound(stream_id.to_string())
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn create_stream(
        &self,
        stream_id: &StreamId,
        genesis_miniblock: Bytes,
    ) -> StorageResult<()> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(stream_id) {
            return Err(StorageError::AlreadyExists(stream_id.to_string()));
        }
        streams.insert(
            stream_id.clone(),
            StreamRecord {
                miniblocks: vec![genesis_miniblock],
                ..Default::default()
            },
        );
        debug!("Created stream {stream_id}");
        Ok(())
    }

    async fn write_event(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_slot: u64,
        envelope: Bytes,
    ) -> StorageResult<()> {
        let mut streams = self.streams.write().await;
        let record = streams
            .get_mut(stream_id)
            .ok_or_else(|| not_found(stream_id))?;

        if record.generation() != expected_generation
            || record.minipool.len() as u64 != expected_slot
        {
            return Err(StorageError::Conflict(format!(
                "{stream_id}: expected generation {expected_generation} slot {expected_slot}, \
                 have generation {} slot {}",
                record.generation(),
                record.minipool.len()
            )));
        }
        record.minipool.push(envelope);
        Ok(())
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
        let mut streams = self.streams.write().await;
        let record = streams
            .get_mut(stream_id)
            .ok_or_else(|| not_found(stream_id))?;

        if record.generation() != expected_generation
            || record.minipool.len() as u64 != expected_minipool_size
        {
            return Err(StorageError::Conflict(format!(
                "{stream_id}: expected generation {expected_generation} with \
                 {expected_minipool_size} pending, have generation {} with {} pending",
                record.generation(),
                record.minipool.len()
            )));
        }
        record.miniblocks.push(miniblock);
        record.minipool = new_minipool;
        if is_snapshot {
            record.last_snapshot_num = expected_generation;
        }
        debug!(
            "Stored miniblock {expected_generation} for {stream_id} ({} carried over)",
            record.minipool.len()
        );
        Ok(())
    }

    async fn read_from_last_snapshot(
        &self,
        stream_id: &StreamId,
        max_generations_back: u64,
    ) -> StorageResult<ReadStreamResult> {
        let streams = self.streams.read().await;
        let record = streams.get(stream_id).ok_or_else(|| not_found(stream_id))?;

        let start = record.last_snapshot_num.saturating_sub(max_generations_back);
        Ok(ReadStreamResult {
            start_miniblock_num: start,
            miniblocks: record.miniblocks[start as usize..].to_vec(),
            minipool_envelopes: record.minipool.clone(),
        })
    }

    async fn read_miniblocks(
        &self,
        stream_id: &StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> StorageResult<Vec<Bytes>> {
        let streams = self.streams.read().await;
        let record = streams.get(stream_id).ok_or_else(|| not_found(stream_id))?;

        let end = to_exclusive.min(record.generation());
        if from_inclusive >= end {
            return Ok(Vec::new());
        }
        Ok(record.miniblocks[from_inclusive as usize..end as usize].to_vec())
    }
}

impl std::fmt::Debug for MemoryStreamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStreamStore")
            .field("streams", &"<locked>")
            .finish()
    }
}
