//! Placement contract and the hash-based placement

use std::sync::Arc;

use async_trait::async_trait;
use relay_events::{Address, StreamId};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::nodes::StreamNodes;

/// Maps a stream id to its ordered replica set
#[async_trait]
pub trait PlacementAdaptor: Clone + Send + Sync + 'static {
    /// Replica addresses for `stream_id`, in placement order
    async fn resolve(&self, stream_id: &StreamId) -> TopologyResult<Vec<Address>>;
}

/// Implement PlacementAdaptor for Arc<T> where T: PlacementAdaptor
#[async_trait]
impl<T: PlacementAdaptor> PlacementAdaptor for Arc<T> {
    async fn resolve(&self, stream_id: &StreamId) -> TopologyResult<Vec<Address>> {
        (**self).resolve(stream_id).await
    }
}

/// Picks `replication_factor` consecutive nodes starting at a position derived
/// from the SHA-256 of the stream id
#[derive(Clone, Debug)]
pub struct HashPlacement {
    nodes: Arc<Vec<Address>>,
    replication_factor: usize,
}

impl HashPlacement {
    pub fn new(mut nodes: Vec<Address>, replication_factor: usize) -> TopologyResult<Self> {
        if replication_factor == 0 {
            return Err(TopologyError::Configuration(
                "replication factor must be at least 1".to_string(),
            ));
        }
        nodes.sort();
        nodes.dedup();
        Ok(Self {
            nodes: Arc::new(nodes),
            replication_factor,
        })
    }

    fn start_index(&self, stream_id: &StreamId) -> usize {
        let digest = Sha256::digest(stream_id.as_str().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % self.nodes.len() as u64) as usize
    }
}

#[async_trait]
impl PlacementAdaptor for HashPlacement {
    async fn resolve(&self, stream_id: &StreamId) -> TopologyResult<Vec<Address>> {
        if self.nodes.is_empty() {
            return Err(TopologyError::NotPlaced(stream_id.to_string()));
        }
        let start = self.start_index(stream_id);
        let count = self.replication_factor.min(self.nodes.len());
        Ok((0..count)
            .map(|i| self.nodes[(start + i) % self.nodes.len()])
            .collect())
    }
}

/// A placement bound to the local node's address
#[derive(Clone, Debug)]
pub struct Topology<P>
where
    P: PlacementAdaptor,
{
    placement: P,
    local: Address,
}

impl<P> Topology<P>
where
    P: PlacementAdaptor,
{
    pub fn new(placement: P, local: Address) -> Self {
        Self { placement, local }
    }

    pub fn local_address(&self) -> Address {
        self.local
    }

    pub fn placement(&self) -> &P {
        &self.placement
    }

    /// Replica set for `stream_id`; an empty placement is `NotPlaced`
    pub async fn stream_nodes(&self, stream_id: &StreamId) -> TopologyResult<StreamNodes> {
        let nodes = self.placement.resolve(stream_id).await?;
        if nodes.is_empty() {
            return Err(TopologyError::NotPlaced(stream_id.to_string()));
        }
        let nodes = StreamNodes::new(stream_id.clone(), nodes, self.local);
        debug!(
            "Resolved {} to {} nodes (local replica: {})",
            stream_id,
            nodes.len(),
            nodes.is_local()
        );
        Ok(nodes)
    }
}
