#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_events::payload::{ChannelInception, ChannelPayload, EncryptedData};
use relay_events::{
    Address, Envelope, EventHash, Payload, StreamId, StreamSettings, Wallet, make_envelope,
};
use relay_service::*;
use relay_storage_memory::MemoryStreamStore;
use relay_stream::{StreamCache, StreamCacheConfig};
use relay_topology_mock::MockPlacement;
use relay_transport_memory::MemoryNetwork;

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

/// Nodes sharing one memory network and one placement table
pub struct Cluster {
    pub network: MemoryNetwork,
    pub placement: MockPlacement,
    pub nodes: Vec<Arc<TestService>>,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        let network = MemoryNetwork::new();
        let placement = MockPlacement::new();
        let nodes = (0..size)
            .map(|_| {
                let cache = Arc::new(StreamCache::new(
                    MemoryStreamStore::new(),
                    Wallet::generate(),
                    StreamCacheConfig::default(),
                ));
                let service = Arc::new(Service::new(
                    cache,
                    placement.clone(),
                    Arc::new(network.clone()) as Arc<dyn NodeRegistry>,
                    ServiceConfig::default(),
                ));
                network
                    .register(
                        service.topology().local_address(),
                        Arc::clone(&service) as Arc<dyn NodeClient>,
                    )
                    .unwrap();
                service
            })
            .collect();
        Self {
            network,
            placement,
            nodes,
        }
    }

    pub fn address(&self, index: usize) -> Address {
        self.nodes[index].topology().local_address()
    }

    /// Place `name` on the nodes at `replicas`
    pub async fn place(&self, name: &str, replicas: &[usize]) -> StreamId {
        let id = channel_id(name);
        let nodes = replicas.iter().map(|&i| self.address(i)).collect();
        self.placement.assign(id.clone(), nodes).await;
        id
    }
}

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

pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
