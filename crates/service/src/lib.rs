//! RPC surface of a relay node
//!
//! [`Service`] serves point operations for streams this node replicates and
//! forwards the rest, fans replicated writes out to every replica, and runs
//! multi-stream sync sessions. Peers are reached through [`NodeClient`]s
//! obtained from a [`NodeRegistry`].

pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod node;
pub mod quorum;
pub mod service;
pub mod sync;

pub use client::{NodeClient, NodeRegistry, SyncResponseStream};
pub use config::{ConfigError, NodeConfig, ServiceConfig};
pub use error::{ErrorCode, RpcError, RpcResult, log_error};
pub use messages::*;
pub use node::RelayNode;
pub use quorum::QuorumPool;
pub use service::Service;
pub use sync::{SyncRegistry, SyncSubscription};
