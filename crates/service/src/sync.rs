//! Multi-stream sync sessions
//!
//! A session partitions its cookies by issuing node. Local cookies are
//! subscribed against in-process streams; each remote node gets one sync
//! call carrying all of its cookies. Every source feeds one bounded channel
//! that the caller drains through [`SyncSubscription`]. The first error from
//! any source cancels the whole session.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use relay_events::{Address, Error, StreamId, SyncCookie};
use relay_storage::StreamStore;
use relay_stream::{Stream, StreamCache, StreamUpdate, SyncResultReceiver};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::client::{NodeRegistry, SyncResponseStream};
use crate::error::{RpcError, RpcResult, log_error};
use crate::messages::{CancelSyncRequest, SyncOp, SyncStreamsRequest, SyncStreamsResponse};

/// Running sessions by sync id
#[derive(Debug, Default)]
pub struct SyncRegistry {
    sessions: DashMap<String, CancellationToken>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sync_id: String, token: CancellationToken) {
        self.sessions.insert(sync_id, token);
    }

    pub fn remove(&self, sync_id: &str) {
        self.sessions.remove(sync_id);
    }

    /// Cancel a session; false if the id is unknown
    pub fn cancel(&self, sync_id: &str) -> bool {
        match self.sessions.get(sync_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// State shared by every source of one session
pub(crate) struct SyncState {
    sync_id: String,
    token: CancellationToken,
    tx: mpsc::Sender<SyncStreamsResponse>,
    error: Mutex<Option<RpcError>>,
}

impl SyncState {
    pub(crate) fn new(
        sync_id: String,
        token: CancellationToken,
        tx: mpsc::Sender<SyncStreamsResponse>,
    ) -> Self {
        Self {
            sync_id,
            token,
            tx,
            error: Mutex::new(None),
        }
    }

    pub(crate) fn sync_id(&self) -> &str {
        &self.sync_id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record the session's first error and tear the session down
    pub(crate) fn fail(&self, err: RpcError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() && !self.token.is_cancelled() {
                *slot = Some(err);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn error(&self) -> Option<RpcError> {
        self.error.lock().clone()
    }

    /// Queue an update without waiting. A full channel ends the session.
    pub(crate) fn send_update(&self, update: StreamUpdate) {
        if self.token.is_cancelled() {
            return;
        }
        let response = SyncStreamsResponse::update(self.sync_id.clone(), update);
        match self.tx.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let err = Error::internal(format!("sync {} buffer full", self.sync_id));
                self.fail(err.into());
            }
            Err(TrySendError::Closed(_)) => {
                self.fail(RpcError::canceled(format!("sync {} receiver gone", self.sync_id)));
            }
        }
    }
}

impl SyncResultReceiver for SyncState {
    fn on_update(&self, update: StreamUpdate) {
        self.send_update(update);
    }

    fn on_sync_error(&self, err: Error) {
        self.fail(err.into());
    }
}

/// Caller side of a session.
///
/// The first item is the `New` message carrying the sync id. After a clean
/// cancellation the last item is a `Close` message; after a failure it is
/// the error. Dropping the subscription cancels the session.
pub struct SyncSubscription {
    state: Arc<SyncState>,
    rx: mpsc::Receiver<SyncStreamsResponse>,
    greeted: bool,
    done: bool,
    _guard: DropGuard,
}

impl SyncSubscription {
    pub(crate) fn new(state: Arc<SyncState>, rx: mpsc::Receiver<SyncStreamsResponse>) -> Self {
        let guard = state.token().clone().drop_guard();
        Self {
            state,
            rx,
            greeted: false,
            done: false,
            _guard: guard,
        }
    }

    pub fn sync_id(&self) -> &str {
        self.state.sync_id()
    }

    pub fn cancel(&self) {
        self.state.token().cancel();
    }

    /// Next message, or `None` once the session has ended
    pub async fn recv(&mut self) -> Option<RpcResult<SyncStreamsResponse>> {
        if self.done {
            return None;
        }
        if !self.greeted {
            self.greeted = true;
            return Some(Ok(SyncStreamsResponse::new_sync(self.state.sync_id())));
        }
        let token = self.state.token().clone();
        let next = tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = token.cancelled() => None,
        };
        match next {
            Some(response) => Some(Ok(response)),
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> Option<RpcResult<SyncStreamsResponse>> {
        self.done = true;
        match self.state.error() {
            Some(err) => Some(Err(err)),
            None => Some(Ok(SyncStreamsResponse::close(self.state.sync_id()))),
        }
    }

    pub fn into_stream(self) -> SyncResponseStream {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|item| (item, sub))
        })
        .boxed()
    }
}

/// Background half of a session: the local subscription task and one task
/// per remote node
pub(crate) struct SyncSession<S>
where
    S: StreamStore,
{
    pub(crate) cache: Arc<StreamCache<S>>,
    pub(crate) nodes: Arc<dyn NodeRegistry>,
    pub(crate) registry: Arc<SyncRegistry>,
    pub(crate) state: Arc<SyncState>,
    pub(crate) task_tracker: TaskTracker,
}

impl<S> SyncSession<S>
where
    S: StreamStore,
{
    /// Spawn all sources and wait until the session ends
    pub(crate) async fn run(self, cookies: Vec<SyncCookie>) {
        let local_address = self.cache.params().node_address();
        let (local, remote) = partition_cookies(local_address, cookies);
        let sync_id = self.state.sync_id().to_string();
        info!(
            "Sync {} started: {} local, {} remote nodes",
            sync_id,
            local.len(),
            remote.len()
        );

        if !local.is_empty() {
            let cache = Arc::clone(&self.cache);
            let state = Arc::clone(&self.state);
            self.task_tracker
                .spawn(async move { sync_local(cache, state, local).await });
        }
        for (address, cookies) in remote {
            let nodes = Arc::clone(&self.nodes);
            let state = Arc::clone(&self.state);
            self.task_tracker
                .spawn(async move { sync_remote(nodes, state, address, cookies).await });
        }

        self.state.token().cancelled().await;
        self.task_tracker.close();
        self.task_tracker.wait().await;
        self.registry.remove(&sync_id);

        match self.state.error() {
            Some(err) => log_error(&format!("Sync {sync_id}"), &err),
            None => info!("Sync {} ended", sync_id),
        }
    }
}

/// Local cookies first, then cookies grouped by remote node. A stream listed
/// twice keeps its last cookie.
pub(crate) fn partition_cookies(
    local_address: Address,
    cookies: Vec<SyncCookie>,
) -> (Vec<SyncCookie>, BTreeMap<Address, Vec<SyncCookie>>) {
    let mut by_node: BTreeMap<Address, BTreeMap<StreamId, SyncCookie>> = BTreeMap::new();
    for cookie in cookies {
        by_node
            .entry(cookie.node_address)
            .or_default()
            .insert(cookie.stream_id.clone(), cookie);
    }
    let local = by_node
        .remove(&local_address)
        .map(|streams| streams.into_values().collect())
        .unwrap_or_default();
    let remote = by_node
        .into_iter()
        .map(|(address, streams)| (address, streams.into_values().collect()))
        .collect();
    (local, remote)
}

async fn sync_local<S>(cache: Arc<StreamCache<S>>, state: Arc<SyncState>, cookies: Vec<SyncCookie>)
where
    S: StreamStore,
{
    let receiver: Arc<dyn SyncResultReceiver> = state.clone();
    let mut subscribed: Vec<Arc<Stream<S>>> = Vec::with_capacity(cookies.len());

    for cookie in cookies {
        if state.token().is_cancelled() {
            break;
        }
        let result = async {
            let stream = cache.get_stream(&cookie.stream_id).await?;
            stream.sub(&cookie, Arc::clone(&receiver)).await?;
            Ok::<_, Error>(stream)
        }
        .await;
        match result {
            Ok(stream) => subscribed.push(stream),
            Err(err) => {
                debug!(
                    "Sync {} could not subscribe to {}: {}",
                    state.sync_id(),
                    cookie.stream_id,
                    err
                );
                state.fail(err.into());
                break;
            }
        }
    }

    state.token().cancelled().await;
    for stream in subscribed {
        stream.unsub(&receiver).await;
    }
}

async fn sync_remote(
    nodes: Arc<dyn NodeRegistry>,
    state: Arc<SyncState>,
    address: Address,
    cookies: Vec<SyncCookie>,
) {
    let client = match nodes.client(&address) {
        Ok(client) => client,
        Err(err) => {
            state.fail(err);
            return;
        }
    };

    let request = SyncStreamsRequest { sync_pos: cookies };
    let mut stream = tokio::select! {
        _ = state.token().cancelled() => return,
        result = client.sync_streams(request) => match result {
            Ok(stream) => stream,
            Err(err) => {
                state.fail(err);
                return;
            }
        },
    };

    let mut remote_sync_id: Option<String> = None;
    loop {
        tokio::select! {
            _ = state.token().cancelled() => break,
            msg = stream.next() => match msg {
                Some(Ok(response)) => match response.sync_op {
                    SyncOp::New => remote_sync_id = Some(response.sync_id),
                    SyncOp::Update => {
                        if let Some(update) = response.stream {
                            state.send_update(update);
                        }
                    }
                    SyncOp::Close => {
                        remote_sync_id = None;
                        state.fail(RpcError::unavailable(format!(
                            "node {address} closed sync {}",
                            response.sync_id
                        )));
                        break;
                    }
                },
                Some(Err(err)) => {
                    state.fail(err);
                    break;
                }
                None => {
                    state.fail(RpcError::unavailable(format!(
                        "sync stream from {address} ended"
                    )));
                    break;
                }
            },
        }
    }

    drop(stream);
    if let Some(sync_id) = remote_sync_id {
        if let Err(err) = client.cancel_sync(CancelSyncRequest { sync_id }).await {
            debug!("Failed to cancel remote sync on {}: {}", address, err);
        }
    }
}
