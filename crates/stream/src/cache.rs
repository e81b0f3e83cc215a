//! Per-node cache of streams keyed by stream id

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use relay_events::{Envelope, Error, MiniblockInfo, RelayResult, StreamId, StreamView, Wallet};
use relay_storage::{StorageError, StreamStore};
use tracing::{debug, info};

use crate::config::StreamCacheConfig;
use crate::stream::{Stream, StreamParams};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCleanupResult {
    pub total_streams: usize,
    pub unloaded_streams: usize,
}

/// Concurrent map of streams. Distinct streams never contend; the map only
/// arbitrates which `Stream` instance owns an id.
pub struct StreamCache<S>
where
    S: StreamStore,
{
    params: Arc<StreamParams<S>>,
    streams: DashMap<StreamId, Arc<Stream<S>>>,
}

impl<S> StreamCache<S>
where
    S: StreamStore,
{
    pub fn new(store: S, wallet: Wallet, config: StreamCacheConfig) -> Self {
        Self {
            params: Arc::new(StreamParams::new(store, wallet, config)),
            streams: DashMap::new(),
        }
    }

    pub fn params(&self) -> &Arc<StreamParams<S>> {
        &self.params
    }

    pub fn config(&self) -> &StreamCacheConfig {
        &self.params.config
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Cached stream without loading or inserting
    pub fn get_cached(&self, stream_id: &StreamId) -> Option<Arc<Stream<S>>> {
        self.streams.get(stream_id).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of every cached stream
    pub fn streams(&self) -> Vec<Arc<Stream<S>>> {
        self.streams.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Cached or newly loaded stream. A failed load evicts the entry so the
    /// next call starts from scratch.
    pub async fn get_stream(&self, stream_id: &StreamId) -> RelayResult<Arc<Stream<S>>> {
        let stream = match self.get_cached(stream_id) {
            Some(stream) => stream,
            None => Arc::clone(
                self.streams
                    .entry(stream_id.clone())
                    .or_insert_with(|| {
                        Arc::new(Stream::new(stream_id.clone(), Arc::clone(&self.params)))
                    })
                    .value(),
            ),
        };

        match stream.get_view().await {
            Ok(_) => Ok(stream),
            Err(err) => {
                self.streams
                    .remove_if(stream_id, |_, cached| Arc::ptr_eq(cached, &stream));
                Err(err)
            }
        }
    }

    /// Seal genesis envelopes into miniblock 0 without touching storage
    pub fn seal_genesis(
        &self,
        stream_id: &StreamId,
        envelopes: &[Envelope],
    ) -> RelayResult<Arc<MiniblockInfo>> {
        let config = &self.params.config.stream;
        let unsealed = StreamView::build(envelopes)?;
        if unsealed.stream_id() != stream_id {
            return Err(Error::bad_stream_id(format!(
                "genesis events create {}, not {}",
                unsealed.stream_id(),
                stream_id
            )));
        }
        let proposal = unsealed
            .propose_next_miniblock(config, true)
            .ok_or_else(|| Error::internal(format!("no genesis proposal for {stream_id}")))?;
        let (header, events) = unsealed.make_miniblock_header(&proposal)?;
        Ok(Arc::new(MiniblockInfo::seal(
            &self.params.wallet,
            header,
            events,
        )?))
    }

    /// Create a stream from its genesis events
    pub async fn create_stream(
        &self,
        stream_id: &StreamId,
        envelopes: &[Envelope],
    ) -> RelayResult<(Arc<Stream<S>>, Arc<StreamView>)> {
        if self.streams.contains_key(stream_id) {
            return Err(Error::already_exists(format!("stream {stream_id}")));
        }
        let genesis = self.seal_genesis(stream_id, envelopes)?;
        self.allocate_stream(stream_id, genesis).await
    }

    /// Persist an already sealed genesis miniblock and cache the new stream.
    ///
    /// Allocating a stream that already holds this exact genesis returns the
    /// existing stream. A different genesis under the same id is rejected.
    pub async fn allocate_stream(
        &self,
        stream_id: &StreamId,
        genesis: Arc<MiniblockInfo>,
    ) -> RelayResult<(Arc<Stream<S>>, Arc<StreamView>)> {
        if self.streams.contains_key(stream_id) {
            return self.load_matching_genesis(stream_id, &genesis).await;
        }
        if genesis.num() != 0 || !genesis.has_snapshot() {
            return Err(Error::bad_block(format!(
                "block {} of {} is not a genesis block",
                genesis.num(),
                stream_id
            )));
        }
        let view = StreamView::load(
            stream_id,
            vec![genesis.as_ref().clone()],
            Vec::new(),
            &self.params.config.stream,
        )?;

        match self
            .params
            .store
            .create_stream(stream_id, genesis.to_bytes()?)
            .await
        {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                debug!("Stream {} already in storage", stream_id);
                return self.load_matching_genesis(stream_id, &genesis).await;
            }
            Err(err) => return Err(err.into()),
        }

        let view = Arc::new(view);
        let stream = Arc::new(Stream::with_view(
            stream_id.clone(),
            Arc::clone(&self.params),
            Arc::clone(&view),
        ));
        match self.streams.entry(stream_id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&stream));
            }
            Entry::Occupied(_) => {
                debug!("Lost cache insert race for {}", stream_id);
                return self.get_stream_and_view(stream_id).await;
            }
        }
        info!("Created stream {}", stream_id);
        Ok((stream, view))
    }

    /// Existing stream whose stored block 0 is `genesis`
    async fn load_matching_genesis(
        &self,
        stream_id: &StreamId,
        genesis: &MiniblockInfo,
    ) -> RelayResult<(Arc<Stream<S>>, Arc<StreamView>)> {
        let stored = self.params.store.read_miniblocks(stream_id, 0, 1).await?;
        let matches = match stored.first() {
            Some(bytes) => MiniblockInfo::from_bytes(bytes)?.hash() == genesis.hash(),
            None => false,
        };
        if !matches {
            return Err(Error::already_exists(format!(
                "stream {stream_id} with a different genesis"
            )));
        }
        self.get_stream_and_view(stream_id).await
    }

    async fn get_stream_and_view(
        &self,
        stream_id: &StreamId,
    ) -> RelayResult<(Arc<Stream<S>>, Arc<StreamView>)> {
        let stream = self.get_stream(stream_id).await?;
        let view = stream.get_view().await?;
        Ok((stream, view))
    }

    /// Flush every cached stream, ending all subscriptions
    pub async fn force_flush_all(&self) {
        for stream in self.streams() {
            stream.force_flush().await;
        }
        info!("Flushed {} streams", self.streams.len());
    }

    /// Unload the views of idle streams that nobody subscribes to.
    ///
    /// Entries stay cached, so an id keeps mapping to one `Stream` and a
    /// later access reloads it from storage.
    pub async fn cache_cleanup(&self, expiration: Duration) -> CacheCleanupResult {
        let mut result = CacheCleanupResult::default();
        for stream in self.streams() {
            result.total_streams += 1;
            if stream.try_cleanup(expiration).await {
                result.unloaded_streams += 1;
            }
        }
        if result.unloaded_streams > 0 {
            debug!(
                "Cache cleanup unloaded {} of {} streams",
                result.unloaded_streams, result.total_streams
            );
        }
        result
    }
}
