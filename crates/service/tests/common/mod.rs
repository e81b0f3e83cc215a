//! Nodes wired to each other in process, without a transport

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use relay_events::payload::{ChannelInception, ChannelPayload, EncryptedData};
use relay_events::{
    Address, Envelope, EventHash, Payload, StreamId, StreamSettings, Wallet, make_envelope,
};
use relay_service::*;
use relay_storage_memory::MemoryStreamStore;
use relay_stream::{StreamCache, StreamCacheConfig};
use relay_topology_mock::MockPlacement;

pub type TestService = Service<MemoryStreamStore, MockPlacement>;

pub fn channel_id(name: &str) -> StreamId {
    StreamId::new(format!("20-{name}")).unwrap()
}

pub fn inception(wallet: &Wallet, stream_id: &StreamId) -> Envelope {
    make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Inception(ChannelInception {
            stream_id: stream_id.clone(),
            space_id: StreamId::new("10-space").unwrap(),
            settings: StreamSettings::default(),
        })),
        vec![],
    )
    .unwrap()
}

pub fn message(wallet: &Wallet, text: &str, prev: Vec<EventHash>) -> Envelope {
    make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Message(EncryptedData {
            ciphertext: Bytes::copy_from_slice(text.as_bytes()),
            algorithm: "none".to_string(),
        })),
        prev,
    )
    .unwrap()
}

/// Address book of in-process peers
#[derive(Default)]
pub struct Peers {
    clients: RwLock<HashMap<Address, Arc<dyn NodeClient>>>,
}

impl Peers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, address: Address, client: Arc<dyn NodeClient>) {
        self.clients.write().insert(address, client);
    }
}

impl NodeRegistry for Peers {
    fn client(&self, address: &Address) -> RpcResult<Arc<dyn NodeClient>> {
        self.clients
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| RpcError::unavailable(format!("no route to {address}")))
    }
}

pub fn node_with(
    peers: &Arc<Peers>,
    placement: &MockPlacement,
    config: ServiceConfig,
) -> Arc<TestService> {
    let cache = Arc::new(StreamCache::new(
        MemoryStreamStore::new(),
        Wallet::generate(),
        StreamCacheConfig::default(),
    ));
    let service = Arc::new(Service::new(
        cache,
        placement.clone(),
        Arc::clone(peers) as Arc<dyn NodeRegistry>,
        config,
    ));
    peers.add(
        service.topology().local_address(),
        Arc::clone(&service) as Arc<dyn NodeClient>,
    );
    service
}

pub fn node(peers: &Arc<Peers>, placement: &MockPlacement) -> Arc<TestService> {
    node_with(peers, placement, ServiceConfig::default())
}

pub fn address(service: &TestService) -> Address {
    service.topology().local_address()
}

/// Peer that answers every call with the same error, optionally after a
/// delay
pub struct BrokenNode {
    pub error: RpcError,
    pub delay: Duration,
}

impl BrokenNode {
    pub fn new(error: RpcError) -> Arc<Self> {
        Arc::new(Self {
            error,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            error: RpcError::new(ErrorCode::Internal, "too late"),
            delay,
        })
    }

    async fn fail<T>(&self) -> RpcResult<T> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(self.error.clone())
    }
}

#[async_trait]
impl NodeClient for BrokenNode {
    async fn create_stream(&self, _: CreateStreamRequest) -> RpcResult<CreateStreamResponse> {
        self.fail().await
    }

    async fn get_stream(&self, _: GetStreamRequest) -> RpcResult<GetStreamResponse> {
        self.fail().await
    }

    async fn get_miniblocks(&self, _: GetMiniblocksRequest) -> RpcResult<GetMiniblocksResponse> {
        self.fail().await
    }

    async fn add_event(&self, _: AddEventRequest) -> RpcResult<AddEventResponse> {
        self.fail().await
    }

    async fn sync_streams(&self, _: SyncStreamsRequest) -> RpcResult<SyncResponseStream> {
        self.fail().await
    }

    async fn cancel_sync(&self, _: CancelSyncRequest) -> RpcResult<CancelSyncResponse> {
        self.fail().await
    }

    async fn allocate_stream(
        &self,
        _: AllocateStreamRequest,
    ) -> RpcResult<AllocateStreamResponse> {
        self.fail().await
    }

    async fn new_event_received(
        &self,
        _: NewEventReceivedRequest,
    ) -> RpcResult<NewEventReceivedResponse> {
        self.fail().await
    }
}

/// Receive the next message that is not the opening `New`
pub async fn next_update(sub: &mut SyncSubscription) -> RpcResult<SyncStreamsResponse> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("sync stalled")
            .expect("sync ended");
        match msg {
            Ok(response) if response.sync_op == SyncOp::New => continue,
            other => return other,
        }
    }
}

/// Poll until `check` holds or a few seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
