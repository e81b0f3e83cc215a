//! Replicated writes that need every replica to acknowledge

use std::future::Future;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use relay_events::Address;
use tracing::debug;

use crate::error::{RpcError, RpcResult};

/// Runs one task per replica concurrently and succeeds only when all of
/// them do.
///
/// Despite the name this is all-ack: `wait` blocks until every task has
/// finished and reports the first failure, if any.
pub struct QuorumPool<'a> {
    operation: String,
    tasks: Vec<BoxFuture<'a, (Option<Address>, RpcResult<()>)>>,
}

impl<'a> QuorumPool<'a> {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            tasks: Vec::new(),
        }
    }

    /// Add the local replica's task
    pub fn add_task<F>(&mut self, task: F)
    where
        F: Future<Output = RpcResult<()>> + Send + 'a,
    {
        self.tasks.push(Box::pin(async move { (None, task.await) }));
    }

    /// Add one task per remote replica
    pub fn add_node_tasks<F, Fut>(&mut self, nodes: &[Address], task: F)
    where
        F: Fn(Address) -> Fut,
        Fut: Future<Output = RpcResult<()>> + Send + 'a,
    {
        for node in nodes {
            let fut = task(*node);
            let node = *node;
            self.tasks.push(Box::pin(async move { (Some(node), fut.await) }));
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task; the first error in completion order wins
    pub async fn wait(self) -> RpcResult<()> {
        let total = self.tasks.len();
        let mut pending: FuturesUnordered<_> = self.tasks.into_iter().collect();
        let mut first_error: Option<RpcError> = None;
        let mut failed = 0;

        while let Some((node, result)) = pending.next().await {
            if let Err(err) = result {
                failed += 1;
                match node {
                    Some(node) => debug!("{} failed on {}: {}", self.operation, node, err),
                    None => debug!("{} failed locally: {}", self.operation, err),
                }
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => {
                debug!("{}: {} of {} replicas failed", self.operation, failed, total);
                Err(err)
            }
            None => Ok(()),
        }
    }
}
