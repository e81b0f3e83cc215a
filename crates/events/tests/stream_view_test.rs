mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use relay_events::payload::MembershipOp;
use relay_events::{
    ErrorKind, EventHash, MiniblockInfo, StreamConfig, StreamSettings, StreamView, Wallet,
    make_envelope,
};

#[test]
fn build_orders_events_causally() {
    let wallet = Wallet::generate();
    let id = channel_id("causal");
    let first = inception(&wallet, &id);
    let a = message(&wallet, "a", vec![first.hash]);
    let b = message(&wallet, "b", vec![a.hash]);

    let view = StreamView::build(&[b.clone(), first.clone(), a.clone()]).unwrap();
    let order: Vec<EventHash> = view.events().map(|e| e.hash).collect();
    assert_eq!(order, vec![first.hash, a.hash, b.hash]);
    assert_eq!(view.leaf_hashes(), vec![b.hash]);
    assert_eq!(view.stream_id(), &id);
    assert!(view.last_block().is_none());
}

#[test]
fn settings_come_from_the_inception() {
    let wallet = Wallet::generate();
    let id = channel_id("quiet");
    let settings = StreamSettings {
        disable_miniblock_creation: true,
    };
    let view = StreamView::build(&[inception_with(&wallet, &id, settings)]).unwrap();
    assert!(view.settings().disable_miniblock_creation);

    let view = StreamView::build(&[inception(&wallet, &channel_id("loud"))]).unwrap();
    assert_eq!(view.settings(), &StreamSettings::default());
}

#[test]
fn build_rejects_duplicate_hash() {
    let wallet = Wallet::generate();
    let first = inception(&wallet, &channel_id("dup"));
    let err = StreamView::build(&[first.clone(), first]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadEvent);
}

#[test]
fn build_rejects_dangling_predecessor() {
    let wallet = Wallet::generate();
    let first = inception(&wallet, &channel_id("dangling"));
    let orphan = message(&wallet, "x", vec![EventHash::digest(b"missing")]);
    let err = StreamView::build(&[first, orphan]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadEvent);
}

#[test]
fn build_rejects_non_inception_root() {
    let wallet = Wallet::generate();
    let first = inception(&wallet, &channel_id("root"));
    let stray = message(&wallet, "x", vec![]);
    let err = StreamView::build(&[stray, first]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadEvent);
}

#[test]
fn build_rejects_inception_for_wrong_kind() {
    let wallet = Wallet::generate();
    let first = make_envelope(
        &wallet,
        relay_events::Payload::Channel(relay_events::payload::ChannelPayload::Inception(
            relay_events::payload::ChannelInception {
                stream_id: relay_events::StreamId::new("10-not-a-channel").unwrap(),
                space_id: relay_events::StreamId::new("10-space").unwrap(),
                settings: Default::default(),
            },
        )),
        vec![],
    )
    .unwrap();
    let err = StreamView::build(&[first]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadStreamId);
}

proptest! {
    #[test]
    fn leaves_are_exactly_unreferenced_events(
        links in prop::collection::vec(
            prop::collection::vec(any::<prop::sample::Index>(), 1..3),
            0..24,
        ),
        shuffle_seed in any::<u64>(),
    ) {
        let wallet = Wallet::generate();
        let mut envelopes = vec![inception(&wallet, &channel_id("prop"))];
        for (i, picks) in links.iter().enumerate() {
            let mut prev: Vec<EventHash> =
                picks.iter().map(|p| envelopes[p.index(i + 1)].hash).collect();
            prev.sort();
            prev.dedup();
            envelopes.push(message(&wallet, &i.to_string(), prev));
        }

        let referenced: BTreeSet<EventHash> = links
            .iter()
            .enumerate()
            .flat_map(|(i, picks)| picks.iter().map(move |p| (i, p)))
            .map(|(i, p)| envelopes[p.index(i + 1)].hash)
            .collect();
        let expected: Vec<EventHash> = envelopes
            .iter()
            .map(|e| e.hash)
            .filter(|h| !referenced.contains(h))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut shuffled = envelopes.clone();
        let len = shuffled.len();
        let mut state = shuffle_seed;
        for i in (1..len).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state >> 33) as usize % (i + 1));
        }

        let view = StreamView::build(&shuffled).unwrap();
        prop_assert_eq!(view.events().count(), envelopes.len());
        prop_assert_eq!(view.leaf_hashes(), expected);
        prop_assert!(view.events().next().unwrap().payload().is_inception());
    }
}

#[test]
fn unsealed_view_proposes_genesis() {
    let wallet = Wallet::generate();
    let id = channel_id("unsealed");
    let first = inception(&wallet, &id);
    let join = membership(&wallet, MembershipOp::Join, "alice", vec![first.hash]);
    let view = StreamView::build(&[first.clone(), join.clone()]).unwrap();
    let config = StreamConfig::default();

    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    assert_eq!(proposal.new_miniblock_num, 0);
    assert_eq!(proposal.prev_miniblock_hash, None);

    let sealed = seal(&view, &wallet, &config, false);
    assert_eq!(sealed.last_block().unwrap().num(), 0);
    assert!(sealed.minipool().is_empty());
    assert_eq!(sealed.minipool().generation(), 1);
    assert_eq!(sealed.minipool().instance_id(), view.minipool().instance_id());
    assert!(sealed.is_member("alice"));
}

#[test]
fn add_event_is_copy_on_write() {
    let wallet = Wallet::generate();
    let (view, genesis) = genesis_view(&wallet, &channel_id("cow"));
    let event = parsed(&message(&wallet, "hi", vec![genesis]));

    let next = view.add_event(Arc::clone(&event)).unwrap();
    assert_eq!(view.minipool().len(), 0);
    assert_eq!(view.leaf_hashes(), vec![genesis]);
    assert_eq!(next.minipool().len(), 1);
    assert_eq!(next.leaf_hashes(), vec![event.hash]);
    assert!(next.get_event(&event.hash).is_some());
    assert!(view.get_event(&event.hash).is_none());
}

#[test]
fn add_event_rejects_bad_events() {
    let wallet = Wallet::generate();
    let id = channel_id("reject");
    let (view, genesis) = genesis_view(&wallet, &id);
    let event = parsed(&message(&wallet, "hi", vec![genesis]));
    let view = view.add_event(Arc::clone(&event)).unwrap();

    let dup = view.add_event(Arc::clone(&event)).unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::BadEvent);

    let dangling = parsed(&message(&wallet, "x", vec![EventHash::digest(b"nope")]));
    assert_eq!(view.add_event(dangling).unwrap_err().kind(), ErrorKind::BadEvent);

    let again = parsed(&inception(&wallet, &id));
    assert_eq!(view.add_event(again).unwrap_err().kind(), ErrorKind::BadEvent);

    let space_event = parsed(
        &make_envelope(
            &wallet,
            relay_events::Payload::Space(relay_events::payload::SpacePayload::Membership(
                relay_events::payload::Membership {
                    op: MembershipOp::Join,
                    user_id: "bob".to_string(),
                },
            )),
            vec![genesis],
        )
        .unwrap(),
    );
    assert_eq!(view.add_event(space_event).unwrap_err().kind(), ErrorKind::BadEvent);
}

#[test]
fn sealing_two_events_reports_stats() {
    let wallet = Wallet::generate();
    let (view, genesis) = genesis_view(&wallet, &channel_id("stats"));
    let a = parsed(&message(&wallet, "a", vec![genesis]));
    let b = parsed(&message(&wallet, "b", vec![genesis]));
    let view = view.add_event(Arc::clone(&a)).unwrap();
    let view = view.add_event(Arc::clone(&b)).unwrap();

    let config = StreamConfig::default();
    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    assert_eq!(proposal.event_hashes, vec![a.hash, b.hash]);
    assert_eq!(proposal.new_miniblock_num, 1);
    assert!(!proposal.should_snapshot);

    let (header, events) = view.make_miniblock_header(&proposal).unwrap();
    let block = MiniblockInfo::seal(&wallet, header, events).unwrap();
    let view = view.apply_block(Arc::new(block), &config).unwrap();

    let stats = view.stats();
    assert_eq!(stats.last_miniblock_num, Some(1));
    assert_eq!(stats.first_miniblock_num, Some(0));
    assert_eq!(stats.events_in_minipool, 0);
    assert_eq!(stats.events_in_miniblocks, 3);
    assert_eq!(stats.snapshots_in_miniblocks, 1);
    assert_eq!(stats.total_events_ever, 3);

    let mut leaves = vec![a.hash, b.hash];
    leaves.sort();
    assert_eq!(view.leaf_hashes(), leaves);
}

#[test]
fn empty_minipool_proposes_nothing_unless_forced() {
    let wallet = Wallet::generate();
    let (view, _) = genesis_view(&wallet, &channel_id("empty"));
    let config = StreamConfig::default();
    assert!(view.propose_next_miniblock(&config, false).is_none());

    let proposal = view.propose_next_miniblock(&config, true).unwrap();
    assert!(proposal.event_hashes.is_empty());
    assert!(proposal.should_snapshot);
    let sealed = seal(&view, &wallet, &config, true);
    assert_eq!(sealed.stats().snapshots_in_miniblocks, 2);
    assert_eq!(sealed.miniblocks_from_last_snapshot().len(), 1);
}

#[test]
fn late_events_carry_into_next_generation() {
    let wallet = Wallet::generate();
    let (view, genesis) = genesis_view(&wallet, &channel_id("carry"));
    let config = StreamConfig::default();
    let early = parsed(&message(&wallet, "early", vec![genesis]));
    let view = view.add_event(Arc::clone(&early)).unwrap();

    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    let late = parsed(&message(&wallet, "late", vec![early.hash]));
    let view = view.add_event(Arc::clone(&late)).unwrap();

    let (header, events) = view.make_miniblock_header(&proposal).unwrap();
    let block = MiniblockInfo::seal(&wallet, header, events).unwrap();
    let view = view.apply_block(Arc::new(block), &config).unwrap();

    assert_eq!(view.minipool().generation(), 2);
    assert_eq!(view.minipool().len(), 1);
    assert_eq!(view.minipool().events()[0].hash, late.hash);
    assert_eq!(view.leaf_hashes(), vec![late.hash]);
}

#[test]
fn stale_proposal_is_rejected() {
    let wallet = Wallet::generate();
    let (view, genesis) = genesis_view(&wallet, &channel_id("stale"));
    let config = StreamConfig::default();
    let view = view
        .add_event(parsed(&message(&wallet, "a", vec![genesis])))
        .unwrap();
    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    let sealed = seal(&view, &wallet, &config, false);

    let err = sealed.make_miniblock_header(&proposal).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadBlock);
}

#[test]
fn apply_rejects_unlinked_block() {
    let wallet = Wallet::generate();
    let (view, genesis) = genesis_view(&wallet, &channel_id("unlinked"));
    let config = StreamConfig::default();
    let view = view
        .add_event(parsed(&message(&wallet, "a", vec![genesis])))
        .unwrap();
    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    let (mut header, events) = view.make_miniblock_header(&proposal).unwrap();
    header.prev_miniblock_hash = Some(EventHash::digest(b"elsewhere"));
    let block = MiniblockInfo::seal(&wallet, header, events).unwrap();
    let err = view.apply_block(Arc::new(block), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadBlock);
}

#[test]
fn snapshot_cadence_follows_config() {
    let wallet = Wallet::generate();
    let (mut view, mut head) = genesis_view(&wallet, &channel_id("cadence"));
    let config = StreamConfig {
        default_min_events_per_snapshot: 3,
        ..Default::default()
    };
    for i in 0..2 {
        let event = parsed(&message(&wallet, &i.to_string(), vec![head]));
        head = event.hash;
        view = view.add_event(event).unwrap();
    }
    assert!(!view.propose_next_miniblock(&config, false).unwrap().should_snapshot);
    view = seal(&view, &wallet, &config, false);

    let event = parsed(&message(&wallet, "third", vec![head]));
    view = view.add_event(event).unwrap();
    let proposal = view.propose_next_miniblock(&config, false).unwrap();
    assert!(proposal.should_snapshot);
    let (header, _) = view.make_miniblock_header(&proposal).unwrap();
    let snapshot = header.snapshot.unwrap();
    assert_eq!(header.prev_snapshot_miniblock_num, 0);
    assert_eq!(header.event_num_offset, 3);
    assert_eq!(snapshot.leaf_hashes.len(), 1);
}

#[test]
fn reloading_from_blocks_restores_state() {
    let wallet = Wallet::generate();
    let id = channel_id("reload");
    let (mut view, genesis) = genesis_view(&wallet, &id);
    let config = StreamConfig::default();

    let join = parsed(&membership(&wallet, MembershipOp::Join, "alice", vec![genesis]));
    view = view.add_event(Arc::clone(&join)).unwrap();
    view = seal(&view, &wallet, &config, false);
    let pending = parsed(&message(&wallet, "pending", vec![join.hash]));
    view = view.add_event(Arc::clone(&pending)).unwrap();

    let blocks: Vec<MiniblockInfo> = view
        .blocks()
        .iter()
        .map(|b| MiniblockInfo::from_bytes(&b.to_bytes().unwrap()).unwrap())
        .collect();
    let reloaded = StreamView::load(&id, blocks, vec![Arc::clone(&pending)], &config).unwrap();

    assert_eq!(reloaded.leaf_hashes(), view.leaf_hashes());
    assert_eq!(reloaded.joined_users(), view.joined_users());
    assert_eq!(reloaded.stats(), view.stats());
    assert_ne!(
        reloaded.minipool().instance_id(),
        view.minipool().instance_id()
    );
}

#[test]
fn pruned_window_tolerates_history_before_it() {
    let wallet = Wallet::generate();
    let id = channel_id("pruned");
    let (mut view, genesis) = genesis_view(&wallet, &id);
    let config = StreamConfig::default();
    let a = parsed(&message(&wallet, "a", vec![genesis]));
    view = view.add_event(Arc::clone(&a)).unwrap();
    view = seal(&view, &wallet, &config, true);
    let b = parsed(&message(&wallet, "b", vec![a.hash]));
    view = view.add_event(Arc::clone(&b)).unwrap();
    view = seal(&view, &wallet, &config, false);

    let window: Vec<MiniblockInfo> = view.blocks()[1..]
        .iter()
        .map(|b| MiniblockInfo::new(b.proto.clone()).unwrap())
        .collect();
    let reloaded = StreamView::load(&id, window, vec![], &config).unwrap();
    assert_eq!(reloaded.stats().first_miniblock_num, Some(1));
    assert_eq!(reloaded.leaf_hashes(), vec![b.hash]);
    assert!(reloaded.inception_event().is_none());
    assert_eq!(reloaded.inception_payload().stream_id(), &id);

    let c = parsed(&message(&wallet, "c", vec![b.hash]));
    reloaded.add_event(c).unwrap();
}

#[test]
fn load_rejects_window_without_snapshot() {
    let wallet = Wallet::generate();
    let id = channel_id("nosnap");
    let (mut view, genesis) = genesis_view(&wallet, &id);
    let config = StreamConfig::default();
    view = view
        .add_event(parsed(&message(&wallet, "a", vec![genesis])))
        .unwrap();
    view = seal(&view, &wallet, &config, false);

    let window = vec![MiniblockInfo::new(view.blocks()[1].proto.clone()).unwrap()];
    let err = StreamView::load(&id, window, vec![], &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadBlock);
}

#[test]
fn joined_users_include_pending_memberships() {
    let wallet = Wallet::generate();
    let (mut view, genesis) = genesis_view(&wallet, &channel_id("members"));
    let config = StreamConfig::default();
    let a = parsed(&membership(&wallet, MembershipOp::Join, "a", vec![genesis]));
    view = view.add_event(Arc::clone(&a)).unwrap();
    view = seal(&view, &wallet, &config, false);

    let leave = parsed(&membership(&wallet, MembershipOp::Leave, "a", vec![a.hash]));
    let join_b = parsed(&membership(&wallet, MembershipOp::Join, "b", vec![leave.hash]));
    view = view.add_event(leave).unwrap();
    view = view.add_event(join_b).unwrap();

    let joined: Vec<String> = view.joined_users().into_iter().collect();
    assert_eq!(joined, vec!["b".to_string()]);
    assert!(!view.is_member("a"));
    assert_eq!(
        view.stream_parent_id().map(|s| s.as_str()),
        Some("10-space")
    );
}

#[test]
fn sync_cookie_tracks_position() {
    let wallet = Wallet::generate();
    let node = Wallet::generate().address();
    let (view, genesis) = genesis_view(&wallet, &channel_id("cookie"));
    let view = view
        .add_event(parsed(&message(&wallet, "a", vec![genesis])))
        .unwrap();
    let cookie = view.sync_cookie(node);
    assert_eq!(cookie.node_address, node);
    assert_eq!(cookie.miniblock_num, 1);
    assert_eq!(cookie.minipool_slot, 1);
    assert_eq!(cookie.minipool_instance_id, view.minipool().instance_id());
    assert_eq!(cookie.prev_miniblock_hash, view.last_block().unwrap().hash());
}
