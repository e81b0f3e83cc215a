//! A relay node: stream cache, miniblock producer and RPC service wired
//! together from one config

use std::sync::Arc;

use relay_events::{Address, Wallet};
use relay_storage::StreamStore;
use relay_stream::{MiniblockProducer, StreamCache};
use relay_topology::PlacementAdaptor;
use tracing::info;

use crate::client::NodeRegistry;
use crate::config::NodeConfig;
use crate::service::Service;

pub struct RelayNode<S, P>
where
    S: StreamStore,
    P: PlacementAdaptor,
{
    service: Arc<Service<S, P>>,
    producer: MiniblockProducer<S>,
}

impl<S, P> RelayNode<S, P>
where
    S: StreamStore,
    P: PlacementAdaptor,
{
    pub fn new(
        config: NodeConfig,
        store: S,
        wallet: Wallet,
        placement: P,
        nodes: Arc<dyn NodeRegistry>,
    ) -> Self {
        let cache = Arc::new(StreamCache::new(store, wallet, config.cache));
        let producer = MiniblockProducer::new(Arc::clone(&cache));
        let service = Arc::new(Service::new(cache, placement, nodes, config.service));
        Self { service, producer }
    }

    pub fn address(&self) -> Address {
        self.service.topology().local_address()
    }

    pub fn service(&self) -> &Arc<Service<S, P>> {
        &self.service
    }

    pub fn producer(&self) -> &MiniblockProducer<S> {
        &self.producer
    }

    /// Start miniblock production and cache cleanup
    pub fn start(&self) {
        info!("Starting relay node {}", self.address());
        self.producer.start();
    }

    /// End all sync sessions, stop background tasks and unload every stream
    pub async fn shutdown(&self) {
        info!("Shutting down relay node {}", self.address());
        self.service.shutdown().await;
        self.producer.shutdown().await;
        self.service.cache().force_flush_all().await;
    }
}
