mod common;

use std::sync::Arc;

use common::*;
use relay_events::{ErrorKind, EventHash, StreamViewStats, SyncCookie, Wallet};
use relay_storage::StreamStore;
use relay_storage_memory::MemoryStreamStore;
use relay_stream::{Stream, SyncResultReceiver};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_create_add_and_seal_end_to_end() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("e2e");

    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let genesis_leaf = view.leaf_hashes();
    assert_eq!(genesis_leaf.len(), 1);

    let first = message(&wallet, "one", genesis_leaf.clone());
    let second = message(&wallet, "two", genesis_leaf);
    stream.add_event(Arc::clone(&first)).await.unwrap();
    stream.add_event(Arc::clone(&second)).await.unwrap();

    let proposal = stream.propose_next_miniblock(false).await.unwrap().unwrap();
    assert_eq!(proposal.new_miniblock_num, 1);
    assert_eq!(proposal.event_hashes, vec![first.hash, second.hash]);

    let (header, events) = stream.make_miniblock_header(&proposal).await.unwrap();
    let view = stream.apply_miniblock(header, events).await.unwrap();

    let stats = view.stats();
    assert_eq!(stats.last_miniblock_num, Some(1));
    assert_eq!(stats.events_in_minipool, 0);
    assert_eq!(stats.events_in_miniblocks, 3);
}

async fn add_late<S: StreamStore>(stream: &Stream<S>, wallet: &Wallet, leaf: &[EventHash]) {
    stream
        .add_event(message(wallet, "late", leaf.to_vec()))
        .await
        .unwrap();
}

/// Seal once with an event added at `stage`, returning what stays pending
async fn pending_after_seal(stage: Option<usize>) -> usize {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("stages");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let leaf = view.leaf_hashes();

    if stage == Some(0) {
        add_late(&stream, &wallet, &leaf).await;
    }
    let proposal = stream.propose_next_miniblock(true).await.unwrap().unwrap();
    if stage == Some(1) {
        add_late(&stream, &wallet, &leaf).await;
    }
    let (header, events) = stream.make_miniblock_header(&proposal).await.unwrap();
    if stage == Some(2) {
        add_late(&stream, &wallet, &leaf).await;
    }
    let view = stream.apply_miniblock(header, events).await.unwrap();
    view.minipool().len()
}

#[tokio::test]
async fn test_events_added_after_proposal_carry_over() {
    assert_eq!(pending_after_seal(Some(0)).await, 0);
    assert_eq!(pending_after_seal(Some(1)).await, 1);
    assert_eq!(pending_after_seal(Some(2)).await, 1);
    assert_eq!(pending_after_seal(None).await, 0);
}

#[tokio::test]
async fn test_carried_events_survive_reload() {
    let store = MemoryStreamStore::new();
    let cache = new_cache(store.clone());
    let wallet = Wallet::generate();
    let id = channel_id("carry");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();

    let proposal = stream.propose_next_miniblock(true).await.unwrap().unwrap();
    let late = message(&wallet, "late", view.leaf_hashes());
    stream.add_event(Arc::clone(&late)).await.unwrap();
    let (header, events) = stream.make_miniblock_header(&proposal).await.unwrap();
    let sealed = stream.apply_miniblock(header, events).await.unwrap();

    let reloaded = new_cache(store).get_stream(&id).await.unwrap();
    let view = reloaded.get_view().await.unwrap();
    assert_eq!(view.minipool().generation(), 2);
    assert!(view.minipool().contains(&late.hash));
    assert_eq!(view.stats().total_events_ever, sealed.stats().total_events_ever);
    assert_eq!(view.stats().last_miniblock_num, Some(1));

    // The carried event is sealed by the next block
    assert_eq!(reloaded.make_miniblock(false).await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_failed_write_leaves_view_unchanged() {
    let store = FlakyStore::default();
    let cache = new_cache(store.clone());
    let wallet = Wallet::generate();
    let id = channel_id("flaky");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let receiver = RecordingReceiver::new();
    stream
        .sub(&view.sync_cookie(cache.params().node_address()), receiver.clone())
        .await
        .unwrap();

    store.set_failing(true);
    let err = stream
        .add_event(message(&wallet, "lost", view.leaf_hashes()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    let after = stream.get_view().await.unwrap();
    assert!(Arc::ptr_eq(&after, &view));
    // Only the initial subscription update
    assert_eq!(receiver.updates().len(), 1);

    store.set_failing(false);
    stream
        .add_event(message(&wallet, "kept", view.leaf_hashes()))
        .await
        .unwrap();
    assert_eq!(stream.get_view().await.unwrap().minipool().len(), 1);
}

#[tokio::test]
async fn test_add_event_rejects_foreign_payload_kind() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("kind");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();

    let dm_message = relay_events::make_parsed_event(
        &wallet,
        relay_events::Payload::Dm(relay_events::payload::DmPayload::Message(
            relay_events::payload::EncryptedData {
                ciphertext: bytes::Bytes::from_static(b"x"),
                algorithm: "none".to_string(),
            },
        )),
        view.leaf_hashes(),
    )
    .unwrap();
    let err = stream.add_event(dm_message).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadEvent);
    assert_eq!(stream.get_view().await.unwrap().minipool().len(), 0);
}

#[tokio::test]
async fn test_subscribers_receive_events_and_cookies() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("subs");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let node = cache.params().node_address();

    let receiver = RecordingReceiver::new();
    let cookie = view.sync_cookie(node);
    stream.sub(&cookie, receiver.clone()).await.unwrap();

    let event = message(&wallet, "hello", view.leaf_hashes());
    let after = stream.add_event(Arc::clone(&event)).await.unwrap();

    let updates = receiver.updates();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].events.is_empty());
    assert!(!updates[0].sync_reset);
    assert_eq!(updates[1].events, vec![event.envelope.clone()]);
    assert_eq!(updates[1].prev_sync_cookie, Some(cookie));
    assert_eq!(updates[1].next_sync_cookie, after.sync_cookie(node));

    stream.make_miniblock(false).await.unwrap();
    let updates = receiver.updates();
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[2].next_sync_cookie.miniblock_num, 2);

    let as_dyn: Arc<dyn SyncResultReceiver> = receiver.clone();
    stream.unsub(&as_dyn).await;
    assert_eq!(stream.subscriber_count().await, 0);
    stream
        .add_event(message(&wallet, "unheard", after.leaf_hashes()))
        .await
        .unwrap();
    assert_eq!(receiver.updates().len(), 3);
}

#[tokio::test]
async fn test_sub_sends_diff_or_reset() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("diff");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let node = cache.params().node_address();
    let leaf = view.leaf_hashes();

    let a = message(&wallet, "a", leaf.clone());
    let b = message(&wallet, "b", leaf.clone());
    stream.add_event(Arc::clone(&a)).await.unwrap();
    let mid_cookie = stream.get_view().await.unwrap().sync_cookie(node);
    stream.add_event(Arc::clone(&b)).await.unwrap();

    // Same generation and instance: only what came after the slot
    let receiver = RecordingReceiver::new();
    stream.sub(&mid_cookie, receiver.clone()).await.unwrap();
    let update = &receiver.updates()[0];
    assert!(!update.sync_reset);
    assert_eq!(update.events, vec![b.envelope.clone()]);

    // Stale generation: full reset
    let stale = RecordingReceiver::new();
    let mut old_cookie = mid_cookie.clone();
    old_cookie.miniblock_num = 0;
    stream.sub(&old_cookie, stale.clone()).await.unwrap();
    let update = &stale.updates()[0];
    assert!(update.sync_reset);
    assert_eq!(update.events.len(), 2);
    assert_eq!(update.miniblocks.len(), 1);

    // Same generation, different minipool instance: reset
    let other_instance = RecordingReceiver::new();
    let mut foreign = mid_cookie.clone();
    foreign.minipool_instance_id = uuid_like(&mid_cookie);
    stream.sub(&foreign, other_instance.clone()).await.unwrap();
    assert!(other_instance.updates()[0].sync_reset);
}

fn uuid_like(cookie: &SyncCookie) -> uuid::Uuid {
    uuid::Uuid::from_u128(cookie.minipool_instance_id.as_u128().wrapping_add(1))
}

#[tokio::test]
async fn test_sub_rejects_foreign_cookies() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("foreign");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();

    let other_node = view.sync_cookie(Wallet::generate().address());
    let err = stream
        .sub(&other_node, RecordingReceiver::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadSyncCookie);

    let mut other_stream = view.sync_cookie(cache.params().node_address());
    other_stream.stream_id = channel_id("elsewhere");
    let err = stream
        .sub(&other_stream, RecordingReceiver::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadSyncCookie);
    assert_eq!(stream.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_force_flush_ends_subscriptions_and_reloads() {
    let cache = memory_cache();
    let wallet = Wallet::generate();
    let id = channel_id("flush");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();
    let receiver = RecordingReceiver::new();
    stream
        .sub(&view.sync_cookie(cache.params().node_address()), receiver.clone())
        .await
        .unwrap();
    let pending = message(&wallet, "pending", view.leaf_hashes());
    stream.add_event(Arc::clone(&pending)).await.unwrap();

    stream.force_flush().await;
    assert!(!stream.is_loaded().await);
    assert_eq!(receiver.errors().len(), 1);
    assert_eq!(stream.subscriber_count().await, 0);

    let reloaded = stream.get_view().await.unwrap();
    assert!(reloaded.minipool().contains(&pending.hash));
    // A fresh in-memory minipool gets a fresh instance id
    assert_ne!(
        reloaded.minipool().instance_id(),
        view.minipool().instance_id()
    );
}

#[tokio::test]
async fn test_load_error_is_sticky_until_flush() {
    let store = MemoryStreamStore::new();
    let cache = new_cache(store.clone());
    let wallet = Wallet::generate();
    let id = channel_id("sticky");

    let stream = Stream::new(id.clone(), Arc::clone(cache.params()));
    let err = stream.get_view().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamNotFound);

    // Storage now has the stream, but the cached error wins
    let genesis = cache.seal_genesis(&id, &[inception(&wallet, &id)]).unwrap();
    store
        .create_stream(&id, genesis.to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(
        stream.get_view().await.unwrap_err().kind(),
        ErrorKind::StreamNotFound
    );
    assert!(stream.load_error().await.is_some());

    stream.force_flush().await;
    let view = stream.get_view().await.unwrap();
    assert_eq!(view.stats().last_miniblock_num, Some(0));
}

#[tokio::test]
async fn test_snapshot_cadence_and_recency_window_on_reload() {
    let store = MemoryStreamStore::new();
    let mut config = relay_stream::StreamCacheConfig::default();
    config.stream.default_min_events_per_snapshot = 2;
    config.stream.recency_generations = 1;
    let cache = Arc::new(relay_stream::StreamCache::new(
        store.clone(),
        Wallet::generate(),
        config.clone(),
    ));
    let wallet = Wallet::generate();
    let id = channel_id("cadence");
    let (stream, view) = cache
        .create_stream(&id, &[inception(&wallet, &id)])
        .await
        .unwrap();

    let mut leaves: Vec<EventHash> = view.leaf_hashes();
    for round in 0..4 {
        let event = message(&wallet, &format!("m{round}"), leaves.clone());
        leaves = vec![event.hash];
        stream.add_event(event).await.unwrap();
        stream.make_miniblock(false).await.unwrap();
    }

    let view = stream.get_view().await.unwrap();
    let StreamViewStats {
        last_miniblock_num,
        snapshots_in_miniblocks,
        total_events_ever,
        ..
    } = view.stats();
    assert_eq!(last_miniblock_num, Some(4));
    assert_eq!(total_events_ever, 5);
    assert!(snapshots_in_miniblocks >= 1);

    let reloaded = relay_stream::StreamCache::new(store, Wallet::generate(), config)
        .get_stream(&id)
        .await
        .unwrap()
        .get_view()
        .await
        .unwrap();
    assert_eq!(reloaded.leaf_hashes(), leaves);
    assert_eq!(reloaded.stats().total_events_ever, 5);
}
