//! Replica sets as seen from one node

use relay_events::{Address, StreamId};

/// Where a point request for a stream should be served
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTarget {
    /// This node is a replica
    Local,
    /// Forward to this replica
    Remote(Address),
}

/// Ordered replica set of one stream, relative to the local node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamNodes {
    stream_id: StreamId,
    nodes: Vec<Address>,
    local: Address,
}

impl StreamNodes {
    /// Create a replica set. Duplicate addresses keep their first position.
    pub fn new(stream_id: StreamId, nodes: Vec<Address>, local: Address) -> Self {
        let mut unique = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !unique.contains(&node) {
                unique.push(node);
            }
        }
        Self {
            stream_id,
            nodes: unique,
            local,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// All replicas in placement order
    pub fn nodes(&self) -> &[Address] {
        &self.nodes
    }

    pub fn local_address(&self) -> Address {
        self.local
    }

    /// Whether the local node holds a replica
    pub fn is_local(&self) -> bool {
        self.nodes.contains(&self.local)
    }

    /// Replicas other than the local node, in placement order
    pub fn remotes(&self) -> Vec<Address> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| *n != self.local)
            .collect()
    }

    /// Local if this node is a replica, otherwise the first remote replica
    pub fn target(&self) -> Option<NodeTarget> {
        if self.is_local() {
            return Some(NodeTarget::Local);
        }
        self.nodes.first().copied().map(NodeTarget::Remote)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
