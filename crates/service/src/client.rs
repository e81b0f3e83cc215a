//! Contracts for reaching other nodes

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_events::Address;

use crate::error::RpcResult;
use crate::messages::*;

/// Responses of a remote sync session, in the order the node sent them
pub type SyncResponseStream = BoxStream<'static, RpcResult<SyncStreamsResponse>>;

/// RPC surface of one relay node, as seen by its peers
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn create_stream(
        &self,
        request: CreateStreamRequest,
    ) -> RpcResult<CreateStreamResponse>;

    async fn get_stream(&self, request: GetStreamRequest) -> RpcResult<GetStreamResponse>;

    async fn get_miniblocks(
        &self,
        request: GetMiniblocksRequest,
    ) -> RpcResult<GetMiniblocksResponse>;

    async fn add_event(&self, request: AddEventRequest) -> RpcResult<AddEventResponse>;

    /// Open a sync session. Dropping the returned stream ends it.
    async fn sync_streams(&self, request: SyncStreamsRequest) -> RpcResult<SyncResponseStream>;

    async fn cancel_sync(&self, request: CancelSyncRequest) -> RpcResult<CancelSyncResponse>;

    async fn allocate_stream(
        &self,
        request: AllocateStreamRequest,
    ) -> RpcResult<AllocateStreamResponse>;

    async fn new_event_received(
        &self,
        request: NewEventReceivedRequest,
    ) -> RpcResult<NewEventReceivedResponse>;
}

/// Resolves node addresses to clients
pub trait NodeRegistry: Send + Sync + 'static {
    fn client(&self, address: &Address) -> RpcResult<Arc<dyn NodeClient>>;
}

impl<T> NodeRegistry for Arc<T>
where
    T: NodeRegistry + ?Sized,
{
    fn client(&self, address: &Address) -> RpcResult<Arc<dyn NodeClient>> {
        (**self).client(address)
    }
}
