//! One stream's lifecycle: load, mutate, seal and fan out to subscribers
//!
//! A `Stream` owns an immutable [`StreamView`] behind a tokio `RwLock`.
//! Reads clone the current `Arc` under the shared lock. Every mutation takes
//! the exclusive lock, builds the next view, persists it, and only then
//! publishes the new `Arc`, so a failed storage write leaves the stream as it
//! was.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_events::{
    Address, Envelope, Error, MiniblockHeader, MiniblockInfo, MiniblockProposal, ParsedEvent,
    RelayResult, StreamId, StreamView, SyncCookie, Wallet, parse_many,
};
use relay_storage::StreamStore;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::StreamCacheConfig;
use crate::receiver::{StreamUpdate, SyncResultReceiver, same_receiver};

/// Collaborators shared by every stream on a node
pub struct StreamParams<S>
where
    S: StreamStore,
{
    pub store: S,
    pub wallet: Wallet,
    pub config: StreamCacheConfig,
}

impl<S> StreamParams<S>
where
    S: StreamStore,
{
    pub fn new(store: S, wallet: Wallet, config: StreamCacheConfig) -> Self {
        Self {
            store,
            wallet,
            config,
        }
    }

    /// Address this node signs headers and issues cookies with
    pub fn node_address(&self) -> Address {
        self.wallet.address()
    }
}

/// `view == None && load_error == None` is the unloaded state
#[derive(Default)]
struct StreamState {
    view: Option<Arc<StreamView>>,
    load_error: Option<Error>,
    receivers: Vec<Arc<dyn SyncResultReceiver>>,
}

pub struct Stream<S>
where
    S: StreamStore,
{
    stream_id: StreamId,
    params: Arc<StreamParams<S>>,
    state: RwLock<StreamState>,
    last_accessed: Mutex<Instant>,
}

impl<S> fmt::Debug for Stream<S>
where
    S: StreamStore,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

impl<S> Stream<S>
where
    S: StreamStore,
{
    /// Unloaded stream; the first access reads it from storage
    pub fn new(stream_id: StreamId, params: Arc<StreamParams<S>>) -> Self {
        Self {
            stream_id,
            params,
            state: RwLock::new(StreamState::default()),
            last_accessed: Mutex::new(Instant::now()),
        }
    }

    /// Stream that starts out loaded with `view`
    pub fn with_view(
        stream_id: StreamId,
        params: Arc<StreamParams<S>>,
        view: Arc<StreamView>,
    ) -> Self {
        Self {
            stream_id,
            params,
            state: RwLock::new(StreamState {
                view: Some(view),
                ..Default::default()
            }),
            last_accessed: Mutex::new(Instant::now()),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn last_accessed(&self) -> Instant {
        *self.last_accessed.lock()
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }

    /// Current view, loading it on first access. A failed load is cached and
    /// returned until the stream is flushed or evicted.
    pub async fn get_view(&self) -> RelayResult<Arc<StreamView>> {
        self.touch();
        {
            let state = self.state.read().await;
            if let Some(view) = &state.view {
                return Ok(Arc::clone(view));
            }
            if let Some(err) = &state.load_error {
                return Err(err.clone());
            }
        }
        let mut state = self.state.write().await;
        self.ensure_loaded(&mut state).await
    }

    /// Current view if loaded, without loading or counting as an access
    pub async fn try_get_view(&self) -> Option<Arc<StreamView>> {
        self.state.read().await.view.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.view.is_some()
    }

    pub async fn load_error(&self) -> Option<Error> {
        self.state.read().await.load_error.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.receivers.len()
    }

    async fn ensure_loaded(&self, state: &mut StreamState) -> RelayResult<Arc<StreamView>> {
        if let Some(view) = &state.view {
            return Ok(Arc::clone(view));
        }
        if let Some(err) = &state.load_error {
            return Err(err.clone());
        }
        match self.load().await {
            Ok(view) => {
                let view = Arc::new(view);
                state.view = Some(Arc::clone(&view));
                Ok(view)
            }
            Err(err) => {
                warn!("Failed to load stream {}: {}", self.stream_id, err);
                state.load_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn load(&self) -> RelayResult<StreamView> {
        let config = &self.params.config;
        let read = self
            .params
            .store
            .read_from_last_snapshot(&self.stream_id, config.max_generations_back)
            .await?;

        let mut blocks = Vec::with_capacity(read.miniblocks.len());
        for (i, bytes) in read.miniblocks.iter().enumerate() {
            let block = MiniblockInfo::from_bytes(bytes)?;
            let expected = read.start_miniblock_num + i as u64;
            if block.num() != expected {
                return Err(Error::bad_block(format!(
                    "stream {} storage returned block {} at position {}",
                    self.stream_id,
                    block.num(),
                    expected
                )));
            }
            blocks.push(block);
        }

        let envelopes = read
            .minipool_envelopes
            .iter()
            .map(|bytes| Envelope::from_bytes(bytes))
            .collect::<RelayResult<Vec<_>>>()?;
        let events = parse_many(&envelopes)?;

        let view = StreamView::load(&self.stream_id, blocks, events, &config.stream)?;
        info!(
            "Loaded stream {} at generation {} with {} pending events",
            self.stream_id,
            view.minipool().generation(),
            view.minipool().len()
        );
        Ok(view)
    }

    /// Append one event to the minipool and notify subscribers
    pub async fn add_event(&self, event: Arc<ParsedEvent>) -> RelayResult<Arc<StreamView>> {
        self.touch();
        let mut state = self.state.write().await;
        let old_view = self.ensure_loaded(&mut state).await?;
        let new_view = Arc::new(old_view.add_event(Arc::clone(&event))?);

        let minipool = old_view.minipool();
        self.params
            .store
            .write_event(
                &self.stream_id,
                minipool.generation(),
                minipool.len() as u64,
                event.envelope.to_bytes()?,
            )
            .await?;

        state.view = Some(Arc::clone(&new_view));
        debug!(
            "Added event {} to {} at slot {}",
            event.hash.short(),
            self.stream_id,
            minipool.len()
        );

        let node_address = self.params.node_address();
        notify(
            &state.receivers,
            StreamUpdate {
                stream_id: self.stream_id.clone(),
                events: vec![event.envelope.clone()],
                miniblocks: Vec::new(),
                next_sync_cookie: new_view.sync_cookie(node_address),
                prev_sync_cookie: Some(old_view.sync_cookie(node_address)),
                sync_reset: false,
            },
        );
        Ok(new_view)
    }

    /// Read-only: what the next miniblock would seal
    pub async fn propose_next_miniblock(
        &self,
        force_snapshot: bool,
    ) -> RelayResult<Option<MiniblockProposal>> {
        let view = self.get_view().await?;
        Ok(view.propose_next_miniblock(&self.params.config.stream, force_snapshot))
    }

    /// Read-only: header and events for `proposal`
    pub async fn make_miniblock_header(
        &self,
        proposal: &MiniblockProposal,
    ) -> RelayResult<(MiniblockHeader, Vec<Arc<ParsedEvent>>)> {
        let view = self.get_view().await?;
        view.make_miniblock_header(proposal)
    }

    /// Sign and persist a miniblock, carrying any events added since the
    /// proposal into the next generation
    pub async fn apply_miniblock(
        &self,
        header: MiniblockHeader,
        events: Vec<Arc<ParsedEvent>>,
    ) -> RelayResult<Arc<StreamView>> {
        let block = Arc::new(MiniblockInfo::seal(&self.params.wallet, header, events)?);

        let mut state = self.state.write().await;
        let old_view = self.ensure_loaded(&mut state).await?;
        let new_view =
            Arc::new(old_view.apply_block(Arc::clone(&block), &self.params.config.stream)?);

        let residual = new_view
            .minipool()
            .events()
            .iter()
            .map(|e| e.envelope.to_bytes())
            .collect::<RelayResult<Vec<_>>>()?;
        let carried = residual.len();

        self.params
            .store
            .write_block(
                &self.stream_id,
                block.num(),
                old_view.minipool().len() as u64,
                block.to_bytes()?,
                block.has_snapshot(),
                residual,
            )
            .await?;

        state.view = Some(Arc::clone(&new_view));
        info!(
            "Sealed miniblock {} for {} with {} events ({} carried over{})",
            block.num(),
            self.stream_id,
            block.events.len(),
            carried,
            if block.has_snapshot() { ", snapshot" } else { "" }
        );

        let node_address = self.params.node_address();
        notify(
            &state.receivers,
            StreamUpdate {
                stream_id: self.stream_id.clone(),
                events: vec![block.proto.header.clone()],
                miniblocks: Vec::new(),
                next_sync_cookie: new_view.sync_cookie(node_address),
                prev_sync_cookie: Some(old_view.sync_cookie(node_address)),
                sync_reset: false,
            },
        );
        Ok(new_view)
    }

    /// Propose, build and apply in one go. Returns the new miniblock number,
    /// or `None` when there was nothing to seal.
    pub async fn make_miniblock(&self, force_snapshot: bool) -> RelayResult<Option<u64>> {
        let Some(proposal) = self.propose_next_miniblock(force_snapshot).await? else {
            return Ok(None);
        };
        let (header, events) = self.make_miniblock_header(&proposal).await?;
        let view = self.apply_miniblock(header, events).await?;
        Ok(view.last_block().map(|b| b.num()))
    }

    /// Register `receiver` and send it everything after `cookie`
    pub async fn sub(
        &self,
        cookie: &SyncCookie,
        receiver: Arc<dyn SyncResultReceiver>,
    ) -> RelayResult<()> {
        let node_address = self.params.node_address();
        if cookie.node_address != node_address {
            return Err(Error::bad_sync_cookie(format!(
                "cookie for {} was issued by {}, not {}",
                cookie.stream_id, cookie.node_address, node_address
            )));
        }
        if cookie.stream_id != self.stream_id {
            return Err(Error::bad_sync_cookie(format!(
                "cookie for {} presented to {}",
                cookie.stream_id, self.stream_id
            )));
        }

        self.touch();
        let mut state = self.state.write().await;
        let view = self.ensure_loaded(&mut state).await?;
        let update = stream_since(&view, node_address, cookie);
        if update.sync_reset {
            debug!(
                "Resetting subscriber of {} from generation {}",
                self.stream_id, cookie.miniblock_num
            );
        }
        if !state.receivers.iter().any(|r| same_receiver(r, &receiver)) {
            state.receivers.push(Arc::clone(&receiver));
        }
        receiver.on_update(update);
        Ok(())
    }

    /// Remove `receiver`; unknown receivers are ignored
    pub async fn unsub(&self, receiver: &Arc<dyn SyncResultReceiver>) {
        let mut state = self.state.write().await;
        state.receivers.retain(|r| !same_receiver(r, receiver));
    }

    /// Drop the view and any load error, and end every subscription
    pub async fn force_flush(&self) {
        let mut state = self.state.write().await;
        state.view = None;
        state.load_error = None;
        let receivers = std::mem::take(&mut state.receivers);
        if !receivers.is_empty() {
            let err = Error::internal(format!("stream {} unloaded", self.stream_id));
            for receiver in receivers {
                receiver.on_sync_error(err.clone());
            }
        }
        debug!("Flushed stream {}", self.stream_id);
    }

    /// Unload the view if idle for `expiration` with no subscribers and an
    /// empty minipool. True only when this call dropped a loaded view.
    pub async fn try_cleanup(&self, expiration: Duration) -> bool {
        let mut state = self.state.write().await;
        let Some(view) = &state.view else {
            return false;
        };
        if !state.receivers.is_empty()
            || !view.minipool().is_empty()
            || self.last_accessed().elapsed() < expiration
        {
            return false;
        }
        state.view = None;
        true
    }
}

/// Diff from `cookie` when it points into the live minipool, otherwise a reset
fn stream_since(view: &StreamView, node_address: Address, cookie: &SyncCookie) -> StreamUpdate {
    let minipool = view.minipool();
    let slot = cookie.minipool_slot as usize;
    let same_minipool = cookie.miniblock_num == minipool.generation()
        && cookie.minipool_instance_id == minipool.instance_id()
        && slot <= minipool.len();

    if same_minipool {
        return StreamUpdate {
            stream_id: view.stream_id().clone(),
            events: minipool
                .events_from_slot(slot)
                .iter()
                .map(|e| e.envelope.clone())
                .collect(),
            miniblocks: Vec::new(),
            next_sync_cookie: view.sync_cookie(node_address),
            prev_sync_cookie: Some(cookie.clone()),
            sync_reset: false,
        };
    }

    StreamUpdate {
        stream_id: view.stream_id().clone(),
        events: view.minipool_envelopes(),
        miniblocks: view.miniblocks_from_last_snapshot(),
        next_sync_cookie: view.sync_cookie(node_address),
        prev_sync_cookie: None,
        sync_reset: true,
    }
}

fn notify(receivers: &[Arc<dyn SyncResultReceiver>], update: StreamUpdate) {
    for receiver in receivers {
        receiver.on_update(update.clone());
    }
}
