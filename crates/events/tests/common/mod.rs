//! Shared builders for stream view tests

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use relay_events::payload::{
    ChannelInception, ChannelPayload, EncryptedData, Membership, MembershipOp,
};
use relay_events::{
    Envelope, EventHash, MiniblockInfo, ParsedEvent, Payload, StreamConfig, StreamId,
    StreamSettings, StreamView, Wallet, make_envelope, make_genesis_header, parse,
};

pub fn channel_id(name: &str) -> StreamId {
    StreamId::new(format!("20-{name}")).unwrap()
}

pub fn inception(wallet: &Wallet, stream_id: &StreamId) -> Envelope {
    inception_with(wallet, stream_id, StreamSettings::default())
}

pub fn inception_with(wallet: &Wallet, stream_id: &StreamId, settings: StreamSettings) -> Envelope {
    make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Inception(ChannelInception {
            stream_id: stream_id.clone(),
            space_id: StreamId::new("10-space").unwrap(),
            settings,
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

pub fn membership(
    wallet: &Wallet,
    op: MembershipOp,
    user: &str,
    prev: Vec<EventHash>,
) -> Envelope {
    make_envelope(
        wallet,
        Payload::Channel(ChannelPayload::Membership(Membership {
            op,
            user_id: user.to_string(),
        })),
        prev,
    )
    .unwrap()
}

pub fn parsed(envelope: &Envelope) -> Arc<ParsedEvent> {
    Arc::new(parse(envelope).unwrap())
}

/// Sealed genesis view of a fresh channel, plus the inception hash
pub fn genesis_view(wallet: &Wallet, stream_id: &StreamId) -> (StreamView, EventHash) {
    let first = parsed(&inception(wallet, stream_id));
    let header = make_genesis_header(std::slice::from_ref(&first)).unwrap();
    let block = MiniblockInfo::seal(wallet, header, vec![Arc::clone(&first)]).unwrap();
    let view = StreamView::load(stream_id, vec![block], vec![], &StreamConfig::default()).unwrap();
    (view, first.hash)
}

/// Propose, build and apply one miniblock
pub fn seal(
    view: &StreamView,
    wallet: &Wallet,
    config: &StreamConfig,
    force_snapshot: bool,
) -> StreamView {
    let proposal = view.propose_next_miniblock(config, force_snapshot).unwrap();
    let (header, events) = view.make_miniblock_header(&proposal).unwrap();
    let block = MiniblockInfo::seal(wallet, header, events).unwrap();
    view.apply_block(Arc::new(block), config).unwrap()
}
