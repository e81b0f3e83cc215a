//! In-memory node network for tests and local clusters
//!
//! Nodes register under their address on a [`MemoryNetwork`]. Every request,
//! response and sync frame is CBOR encoded and decoded on its way between
//! nodes, so whatever crosses this network would also survive a real wire.
//! Removing a node makes new calls to it fail as unavailable and ends open
//! sync streams from it at their next frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use relay_events::Address;
use relay_service::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors raised while moving frames between nodes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("node {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("no node registered at {0}")]
    NotRegistered(Address),

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("failed to decode frame: {0}")]
    Decode(String),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotRegistered(_) => RpcError::unavailable(err.to_string()),
            _ => RpcError::new(ErrorCode::Internal, err.to_string()),
        }
    }
}

/// Encode a value as one CBOR frame
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| TransportError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(frame).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Shared routing table of in-process nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<DashMap<Address, Arc<dyn NodeClient>>>,
    frames: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` reachable at `address`
    pub fn register(
        &self,
        address: Address,
        node: Arc<dyn NodeClient>,
    ) -> Result<(), TransportError> {
        if self.nodes.contains_key(&address) {
            return Err(TransportError::AlreadyRegistered(address));
        }
        self.nodes.insert(address, node);
        info!("Node {} joined the memory network", address);
        Ok(())
    }

    /// Take a node off the network. Returns false if it was not registered.
    pub fn unregister(&self, address: &Address) -> bool {
        let removed = self.nodes.remove(address).is_some();
        if removed {
            info!("Node {} left the memory network", address);
        }
        removed
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Frames carried so far, counting both directions
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn resolve(&self, address: &Address) -> Result<Arc<dyn NodeClient>, TransportError> {
        self.nodes
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TransportError::NotRegistered(*address))
    }

    /// Send `value` across the network: encode, count, decode
    fn carry<T>(&self, value: &T) -> Result<T, TransportError>
    where
        T: Serialize + DeserializeOwned,
    {
        let frame = encode(value)?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        trace!("Carrying {} byte frame", frame.len());
        decode(&frame)
    }
}

impl NodeRegistry for MemoryNetwork {
    fn client(&self, address: &Address) -> RpcResult<Arc<dyn NodeClient>> {
        if !self.contains(address) {
            return Err(TransportError::NotRegistered(*address).into());
        }
        Ok(Arc::new(MemoryClient {
            address: *address,
            network: self.clone(),
        }))
    }
}

/// Client for one remote node. The node is looked up again on every call.
pub struct MemoryClient {
    address: Address,
    network: MemoryNetwork,
}

impl MemoryClient {
    pub fn address(&self) -> Address {
        self.address
    }

    async fn call<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        request: Req,
        handler: F,
    ) -> RpcResult<Resp>
    where
        Req: Serialize + DeserializeOwned,
        Resp: Serialize + DeserializeOwned,
        F: FnOnce(Arc<dyn NodeClient>, Req) -> Fut,
        Fut: Future<Output = RpcResult<Resp>>,
    {
        let node = self.network.resolve(&self.address)?;
        debug!("Calling {} on {}", method, self.address);
        let request = self.network.carry(&request)?;
        let result = handler(node, request).await;
        self.network.carry(&result)?
    }
}

#[async_trait]
impl NodeClient for MemoryClient {
    async fn create_stream(
        &self,
        request: CreateStreamRequest,
    ) -> RpcResult<CreateStreamResponse> {
        self.call("create_stream", request, |node, req| async move {
            node.create_stream(req).await
        })
        .await
    }

    async fn get_stream(&self, request: GetStreamRequest) -> RpcResult<GetStreamResponse> {
        self.call("get_stream", request, |node, req| async move {
            node.get_stream(req).await
        })
        .await
    }

    async fn get_miniblocks(
        &self,
        request: GetMiniblocksRequest,
    ) -> RpcResult<GetMiniblocksResponse> {
        self.call("get_miniblocks", request, |node, req| async move {
            node.get_miniblocks(req).await
        })
        .await
    }

    async fn add_event(&self, request: AddEventRequest) -> RpcResult<AddEventResponse> {
        self.call("add_event", request, |node, req| async move {
            node.add_event(req).await
        })
        .await
    }

    async fn sync_streams(&self, request: SyncStreamsRequest) -> RpcResult<SyncResponseStream> {
        let node = self.network.resolve(&self.address)?;
        debug!("Opening sync with {}", self.address);
        let request = self.network.carry(&request)?;
        let remote = match node.sync_streams(request).await {
            Ok(remote) => remote,
            Err(err) => return Err(self.network.carry(&err)?),
        };

        let network = self.network.clone();
        let address = self.address;
        let frames = futures::stream::unfold(Some(remote), move |remote| {
            let network = network.clone();
            async move {
                let mut remote = remote?;
                let item = remote.next().await?;
                if !network.contains(&address) {
                    let err = RpcError::unavailable(format!("connection to {address} lost"));
                    return Some((Err(err), None));
                }
                let item = network.carry(&item).map_err(RpcError::from).and_then(|r| r);
                Some((item, Some(remote)))
            }
        });
        Ok(frames.boxed())
    }

    async fn cancel_sync(&self, request: CancelSyncRequest) -> RpcResult<CancelSyncResponse> {
        self.call("cancel_sync", request, |node, req| async move {
            node.cancel_sync(req).await
        })
        .await
    }

    async fn allocate_stream(
        &self,
        request: AllocateStreamRequest,
    ) -> RpcResult<AllocateStreamResponse> {
        self.call("allocate_stream", request, |node, req| async move {
            node.allocate_stream(req).await
        })
        .await
    }

    async fn new_event_received(
        &self,
        request: NewEventReceivedRequest,
    ) -> RpcResult<NewEventReceivedResponse> {
        self.call("new_event_received", request, |node, req| async move {
            node.new_event_received(req).await
        })
        .await
    }
}
