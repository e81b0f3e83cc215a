//! RPC handlers of one relay node
//!
//! Point operations are served locally when this node is a replica of the
//! stream and forwarded verbatim to the stream's first node otherwise.
//! Writes to a replicated stream go to every replica through a
//! [`QuorumPool`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use relay_events::{Error, Miniblock, MiniblockInfo, StreamId, parse};
use relay_storage::StreamStore;
use relay_stream::StreamCache;
use relay_topology::{NodeTarget, PlacementAdaptor, StreamNodes, Topology};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{NodeClient, NodeRegistry, SyncResponseStream};
use crate::config::ServiceConfig;
use crate::error::{RpcError, RpcResult, log_error};
use crate::messages::*;
use crate::quorum::QuorumPool;
use crate::sync::{SyncRegistry, SyncSession, SyncState, SyncSubscription};

/// Node-facing and node-to-node RPC surface over a stream cache
pub struct Service<S, P>
where
    S: StreamStore,
    P: PlacementAdaptor,
{
    cache: Arc<StreamCache<S>>,
    topology: Topology<P>,
    nodes: Arc<dyn NodeRegistry>,
    config: ServiceConfig,
    syncs: Arc<SyncRegistry>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<S, P> Service<S, P>
where
    S: StreamStore,
    P: PlacementAdaptor,
{
    pub fn new(
        cache: Arc<StreamCache<S>>,
        placement: P,
        nodes: Arc<dyn NodeRegistry>,
        config: ServiceConfig,
    ) -> Self {
        let local = cache.params().node_address();
        Self {
            cache,
            topology: Topology::new(placement, local),
            nodes,
            config,
            syncs: Arc::new(SyncRegistry::new()),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn cache(&self) -> &Arc<StreamCache<S>> {
        &self.cache
    }

    pub fn topology(&self) -> &Topology<P> {
        &self.topology
    }

    /// Number of sync sessions still running
    pub fn active_syncs(&self) -> usize {
        self.syncs.len()
    }

    pub async fn create_stream(
        &self,
        request: CreateStreamRequest,
    ) -> RpcResult<CreateStreamResponse> {
        self.logged("create_stream", self.create_stream_impl(request)).await
    }

    async fn create_stream_impl(
        &self,
        request: CreateStreamRequest,
    ) -> RpcResult<CreateStreamResponse> {
        let nodes = self.stream_nodes(&request.stream_id).await?;
        if let Some(NodeTarget::Remote(target)) = nodes.target() {
            debug!("Forwarding create of {} to {}", request.stream_id, target);
            let client = self.nodes.client(&target)?;
            return self.forward(client.create_stream(request)).await;
        }

        let stream_id = request.stream_id;
        let genesis = self.cache.seal_genesis(&stream_id, &request.events)?;
        let miniblock = genesis.proto.clone();

        let mut pool = QuorumPool::new(format!("create_stream {stream_id}"));
        pool.add_task(async {
            self.cache
                .allocate_stream(&stream_id, Arc::clone(&genesis))
                .await?;
            Ok::<_, RpcError>(())
        });
        let remotes = nodes.remotes();
        pool.add_node_tasks(&remotes, |node| {
            let request = AllocateStreamRequest {
                stream_id: stream_id.clone(),
                miniblock: miniblock.clone(),
            };
            async move {
                let client = self.nodes.client(&node)?;
                self.forward(client.allocate_stream(request)).await?;
                Ok::<_, RpcError>(())
            }
        });
        pool.wait().await?;

        let view = self.cache.get_stream(&stream_id).await?.get_view().await?;
        info!("Created stream {} on {} nodes", stream_id, nodes.len());
        Ok(CreateStreamResponse {
            stream: StreamAndCookie::from_view(&view, self.topology.local_address()),
        })
    }

    pub async fn get_stream(&self, request: GetStreamRequest) -> RpcResult<GetStreamResponse> {
        self.logged("get_stream", self.get_stream_impl(request)).await
    }

    async fn get_stream_impl(&self, request: GetStreamRequest) -> RpcResult<GetStreamResponse> {
        match self.target(&request.stream_id).await? {
            NodeTarget::Local => {
                let stream = self.cache.get_stream(&request.stream_id).await?;
                let view = stream.get_view().await?;
                Ok(GetStreamResponse {
                    stream: StreamAndCookie::from_view(&view, self.topology.local_address()),
                })
            }
            NodeTarget::Remote(node) => {
                let client = self.nodes.client(&node)?;
                self.forward(client.get_stream(request)).await
            }
        }
    }

    pub async fn get_miniblocks(
        &self,
        request: GetMiniblocksRequest,
    ) -> RpcResult<GetMiniblocksResponse> {
        self.logged("get_miniblocks", self.get_miniblocks_impl(request)).await
    }

    async fn get_miniblocks_impl(
        &self,
        request: GetMiniblocksRequest,
    ) -> RpcResult<GetMiniblocksResponse> {
        match self.target(&request.stream_id).await? {
            NodeTarget::Local => {
                let blocks = self
                    .cache
                    .params()
                    .store
                    .read_miniblocks(
                        &request.stream_id,
                        request.from_inclusive,
                        request.to_exclusive,
                    )
                    .await
                    .map_err(Error::from)?;
                let miniblocks = blocks
                    .iter()
                    .map(|bytes| Miniblock::from_bytes(bytes))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GetMiniblocksResponse {
                    miniblocks,
                    terminus: request.from_inclusive == 0,
                })
            }
            NodeTarget::Remote(node) => {
                let client = self.nodes.client(&node)?;
                self.forward(client.get_miniblocks(request)).await
            }
        }
    }

    pub async fn add_event(&self, request: AddEventRequest) -> RpcResult<AddEventResponse> {
        self.logged("add_event", self.add_event_impl(request)).await
    }

    async fn add_event_impl(&self, request: AddEventRequest) -> RpcResult<AddEventResponse> {
        let event = Arc::new(parse(&request.event)?);
        if event.prev_event_hashes().is_empty() {
            let err = Error::bad_event(format!("event {} has no prev events", event.hash));
            return Err(err.into());
        }

        let nodes = self.stream_nodes(&request.stream_id).await?;
        if let Some(NodeTarget::Remote(target)) = nodes.target() {
            debug!("Forwarding event for {} to {}", request.stream_id, target);
            let client = self.nodes.client(&target)?;
            return self.forward(client.add_event(request)).await;
        }

        let stream_id = &request.stream_id;
        let mut pool = QuorumPool::new(format!("add_event {stream_id}"));
        pool.add_task(async {
            let stream = self.cache.get_stream(stream_id).await?;
            stream.add_event(event).await?;
            Ok::<_, RpcError>(())
        });
        let remotes = nodes.remotes();
        pool.add_node_tasks(&remotes, |node| {
            let request = NewEventReceivedRequest {
                stream_id: stream_id.clone(),
                event: request.event.clone(),
            };
            async move {
                let client = self.nodes.client(&node)?;
                self.forward(client.new_event_received(request)).await?;
                Ok::<_, RpcError>(())
            }
        });
        pool.wait().await?;
        Ok(AddEventResponse {})
    }

    /// Start a sync session over `request.sync_pos`. The session runs until
    /// the subscription is dropped or cancelled, or any source fails.
    pub fn sync_streams(&self, request: SyncStreamsRequest) -> SyncSubscription {
        let sync_id = Uuid::new_v4().to_string();
        let token = self.shutdown_token.child_token();
        let (tx, rx) = mpsc::channel(self.config.sync_channel_capacity.max(1));
        let state = Arc::new(SyncState::new(sync_id.clone(), token.clone(), tx));
        self.syncs.insert(sync_id, token);

        let session = SyncSession {
            cache: Arc::clone(&self.cache),
            nodes: Arc::clone(&self.nodes),
            registry: Arc::clone(&self.syncs),
            state: Arc::clone(&state),
            task_tracker: TaskTracker::new(),
        };
        self.task_tracker
            .spawn(async move { session.run(request.sync_pos).await });
        SyncSubscription::new(state, rx)
    }

    /// Cancel a running session; unknown ids are ignored
    pub fn cancel_sync(&self, request: CancelSyncRequest) -> CancelSyncResponse {
        if !self.syncs.cancel(&request.sync_id) {
            debug!("Cancel of unknown sync {}", request.sync_id);
        }
        CancelSyncResponse {}
    }

    /// Node to node: store a genesis block sealed by another replica
    pub async fn allocate_stream(
        &self,
        request: AllocateStreamRequest,
    ) -> RpcResult<AllocateStreamResponse> {
        self.logged("allocate_stream", async {
            let genesis = Arc::new(MiniblockInfo::new(request.miniblock)?);
            let (_, view) = self
                .cache
                .allocate_stream(&request.stream_id, genesis)
                .await?;
            Ok::<_, RpcError>(AllocateStreamResponse {
                sync_cookie: view.sync_cookie(self.topology.local_address()),
            })
        })
        .await
    }

    /// Node to node: append an event another replica accepted
    pub async fn new_event_received(
        &self,
        request: NewEventReceivedRequest,
    ) -> RpcResult<NewEventReceivedResponse> {
        self.logged("new_event_received", async {
            let event = Arc::new(parse(&request.event)?);
            let stream = self.cache.get_stream(&request.stream_id).await?;
            stream.add_event(event).await?;
            Ok::<_, RpcError>(NewEventReceivedResponse {})
        })
        .await
    }

    /// End every sync session and wait for their tasks
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("Service stopped");
    }

    async fn stream_nodes(&self, stream_id: &StreamId) -> RpcResult<StreamNodes> {
        Ok(self.topology.stream_nodes(stream_id).await?)
    }

    async fn target(&self, stream_id: &StreamId) -> RpcResult<NodeTarget> {
        let nodes = self.stream_nodes(stream_id).await?;
        nodes
            .target()
            .ok_or_else(|| Error::not_found(format!("stream {stream_id} has no nodes")).into())
    }

    /// Relay a peer's response or error unchanged, bounded by the forward
    /// timeout
    async fn forward<T, F>(&self, call: F) -> RpcResult<T>
    where
        F: Future<Output = RpcResult<T>>,
    {
        match tokio::time::timeout(self.config.forward_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::canceled(format!(
                "peer call timed out after {:?}",
                self.config.forward_timeout
            ))),
        }
    }

    async fn logged<T, F>(&self, operation: &str, call: F) -> RpcResult<T>
    where
        F: Future<Output = RpcResult<T>>,
    {
        let result = call.await;
        if let Err(err) = &result {
            log_error(operation, err);
        }
        result
    }
}

#[async_trait]
impl<S, P> NodeClient for Service<S, P>
where
    S: StreamStore,
    P: PlacementAdaptor,
{
    async fn create_stream(
        &self,
        request: CreateStreamRequest,
    ) -> RpcResult<CreateStreamResponse> {
        Service::create_stream(self, request).await
    }

    async fn get_stream(&self, request: GetStreamRequest) -> RpcResult<GetStreamResponse> {
        Service::get_stream(self, request).await
    }

    async fn get_miniblocks(
        &self,
        request: GetMiniblocksRequest,
    ) -> RpcResult<GetMiniblocksResponse> {
        Service::get_miniblocks(self, request).await
    }

    async fn add_event(&self, request: AddEventRequest) -> RpcResult<AddEventResponse> {
        Service::add_event(self, request).await
    }

    async fn sync_streams(&self, request: SyncStreamsRequest) -> RpcResult<SyncResponseStream> {
        Ok(Service::sync_streams(self, request).into_stream())
    }

    async fn cancel_sync(&self, request: CancelSyncRequest) -> RpcResult<CancelSyncResponse> {
        Ok(Service::cancel_sync(self, request))
    }

    async fn allocate_stream(
        &self,
        request: AllocateStreamRequest,
    ) -> RpcResult<AllocateStreamResponse> {
        Service::allocate_stream(self, request).await
    }

    async fn new_event_received(
        &self,
        request: NewEventReceivedRequest,
    ) -> RpcResult<NewEventReceivedResponse> {
        Service::new_event_received(self, request).await
    }
}
