//! Static, table-driven placement for tests and local clusters

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_events::{Address, StreamId};
use relay_topology::{PlacementAdaptor, TopologyError, TopologyResult};
use tokio::sync::RwLock;

/// Placement that answers from an explicit table, falling back to a default
/// replica set for streams without an entry
#[derive(Clone, Debug, Default)]
pub struct MockPlacement {
    assignments: Arc<RwLock<HashMap<StreamId, Vec<Address>>>>,
    default_nodes: Arc<RwLock<Vec<Address>>>,
}

impl MockPlacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every unassigned stream resolves to `nodes`
    pub fn with_default_nodes(nodes: Vec<Address>) -> Self {
        Self {
            assignments: Arc::default(),
            default_nodes: Arc::new(RwLock::new(nodes)),
        }
    }

    /// Place `stream_id` on `nodes`, replacing any earlier assignment
    pub async fn assign(&self, stream_id: StreamId, nodes: Vec<Address>) {
        self.assignments.write().await.insert(stream_id, nodes);
    }

    pub async fn unassign(&self, stream_id: &StreamId) {
        self.assignments.write().await.remove(stream_id);
    }

    pub async fn set_default_nodes(&self, nodes: Vec<Address>) {
        *self.default_nodes.write().await = nodes;
    }
}

#[async_trait]
impl PlacementAdaptor for MockPlacement {
    async fn resolve(&self, stream_id: &StreamId) -> TopologyResult<Vec<Address>> {
        if let Some(nodes) = self.assignments.read().await.get(stream_id) {
            return Ok(nodes.clone());
        }
        let defaults = self.default_nodes.read().await;
        if defaults.is_empty() {
            return Err(TopologyError::NotPlaced(stream_id.to_string()));
        }
        Ok(defaults.clone())
    }
}
