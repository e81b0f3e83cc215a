//! Shared fixtures for stream and cache tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_events::payload::{ChannelInception, ChannelPayload, EncryptedData};
use relay_events::{
    Envelope, Error, EventHash, ParsedEvent, Payload, StreamId, StreamSettings, Wallet,
    make_envelope, parse,
};
use relay_storage::{ReadStreamResult, StorageError, StorageResult, StreamStore};
use relay_storage_memory::MemoryStreamStore;
use relay_stream::{StreamCache, StreamCacheConfig, StreamUpdate, SyncResultReceiver};

pub fn channel_id(name: &str) -> StreamId {
    StreamId::new(format!("20-{name}")).unwrap()
}

pub fn inception_with(
    wallet: &Wallet,
    stream_id: &StreamId,
    settings: StreamSettings,
) -> Envelope {
    make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Inception(ChannelInception {
            stream_id: stream_id.clone(),
            space_id: StreamId::new("10-space").unwrap(),
            settings,
        })),
        vec![],
    )
    .unwrap()
}

pub fn inception(wallet: &Wallet, stream_id: &StreamId) -> Envelope {
    inception_with(wallet, stream_id, StreamSettings::default())
}

pub fn message(wallet: &Wallet, text: &str, prev: Vec<EventHash>) -> Arc<ParsedEvent> {
    let envelope = make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Message(EncryptedData {
            ciphertext: Bytes::copy_from_slice(text.as_bytes()),
            algorithm: "none".to_string(),
        })),
        prev,
    )
    .unwrap();
    Arc::new(parse(&envelope).unwrap())
}

pub fn new_cache<S: StreamStore>(store: S) -> Arc<StreamCache<S>> {
    Arc::new(StreamCache::new(
        store,
        Wallet::generate(),
        StreamCacheConfig::default(),
    ))
}

pub fn memory_cache() -> Arc<StreamCache<MemoryStreamStore>> {
    new_cache(MemoryStreamStore::new())
}

/// Receiver that records everything it is given
#[derive(Default)]
pub struct RecordingReceiver {
    pub updates: Mutex<Vec<StreamUpdate>>,
    pub errors: Mutex<Vec<Error>>,
}

impl RecordingReceiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<StreamUpdate> {
        self.updates.lock().clone()
    }

    pub fn errors(&self) -> Vec<Error> {
        self.errors.lock().clone()
    }
}

impl SyncResultReceiver for RecordingReceiver {
    fn on_update(&self, update: StreamUpdate) {
        self.updates.lock().push(update);
    }

    fn on_sync_error(&self, err: Error) {
        self.errors.lock().push(err);
    }
}

/// Memory store whose writes can be switched to fail
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStreamStore,
    pub fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamStore for FlakyStore {
    async fn create_stream(
        &self,
        stream_id: &StreamId,
        genesis_miniblock: Bytes,
    ) -> StorageResult<()> {
        self.check()?;
        self.inner.create_stream(stream_id, genesis_miniblock).await
    }

    async fn write_event(
        &self,
        stream_id: &StreamId,
        expected_generation: u64,
        expected_slot: u64,
        envelope: Bytes,
    ) -> StorageResult<()> {
        self.check()?;
        self.inner
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
        self.check()?;
        self.inner
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
        self.inner
            .read_from_last_snapshot(stream_id, max_generations_back)
            .await
    }

    async fn read_miniblocks(
        &self,
        stream_id: &StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> StorageResult<Vec<Bytes>> {
        self.inner
            .read_miniblocks(stream_id, from_inclusive, to_exclusive)
            .await
    }
}
