//! Sealed miniblocks and their headers

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::dag;
use crate::error::{Error, ErrorKind, RelayResult};
use crate::event::{Envelope, ParsedEvent, make_parsed_event, parse, parse_many};
use crate::hash::EventHash;
use crate::payload::Payload;
use crate::snapshot::Snapshot;
use crate::wallet::Wallet;

/// Header of a sealed block, carried as the payload of a signed header event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniblockHeader {
    pub miniblock_num: u64,
    /// Milliseconds since the unix epoch, strictly increasing along the chain
    pub timestamp: i64,
    pub event_hashes: Vec<EventHash>,
    /// Hash of the previous block's header event; `None` only for genesis
    pub prev_miniblock_hash: Option<EventHash>,
    pub snapshot: Option<Snapshot>,
    /// Number of events sealed in all earlier blocks
    pub event_num_offset: u64,
    /// Most recent earlier block that carried a snapshot
    pub prev_snapshot_miniblock_num: u64,
}

/// Sealed, signed unit of events; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Miniblock {
    pub header: Envelope,
    pub events: Vec<Envelope>,
}

impl Miniblock {
    pub fn to_bytes(&self) -> RelayResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    pub fn from_bytes(bytes: &[u8]) -> RelayResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| Error::chain(ErrorKind::BadBlock, "Decoding miniblock", e))
    }
}

/// Wrap a header event and the events it seals.
///
/// Only checks that the header event actually carries a header payload.
pub fn make_miniblock(
    header_event: &ParsedEvent,
    events: &[Arc<ParsedEvent>],
) -> RelayResult<Miniblock> {
    if !header_event.is_miniblock_header() {
        return Err(Error::bad_event("miniblock header event lacks a header payload"));
    }
    Ok(Miniblock {
        header: header_event.envelope.clone(),
        events: events.iter().map(|e| e.envelope.clone()).collect(),
    })
}

/// Build the header of block 0 from the genesis events.
///
/// `events[0]` must be the inception; no other genesis event may be an
/// inception or a header.
pub fn make_genesis_header(events: &[Arc<ParsedEvent>]) -> RelayResult<MiniblockHeader> {
    let first = events
        .first()
        .ok_or_else(|| Error::bad_event("genesis requires at least one event"))?;
    if !first.payload().is_inception() {
        return Err(Error::bad_event("first genesis event must be an inception"));
    }
    for event in &events[1..] {
        if event.payload().is_inception() || event.is_miniblock_header() {
            return Err(Error::bad_event(format!(
                "genesis event {} must not be an inception or header",
                event.hash.short()
            )));
        }
    }

    let mut snapshot = Snapshot::genesis(events)?;
    snapshot.leaf_hashes = dag::frontier(&[], events.iter().map(Arc::as_ref));

    Ok(MiniblockHeader {
        miniblock_num: 0,
        timestamp: next_miniblock_timestamp(None),
        event_hashes: events.iter().map(|e| e.hash).collect(),
        prev_miniblock_hash: None,
        snapshot: Some(snapshot),
        event_num_offset: 0,
        prev_snapshot_miniblock_num: 0,
    })
}

/// Timestamp for the next header: wall clock, or `prev + 1` if the clock has
/// not moved past the previous header
pub fn next_miniblock_timestamp(prev: Option<i64>) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    match prev {
        Some(prev) if now <= prev => prev + 1,
        _ => now,
    }
}

/// A miniblock decoded into parsed events
#[derive(Debug, Clone)]
pub struct MiniblockInfo {
    pub header_event: Arc<ParsedEvent>,
    pub events: Vec<Arc<ParsedEvent>>,
    pub proto: Miniblock,
    header: MiniblockHeader,
}

impl MiniblockInfo {
    /// Decode a miniblock and check its header lists exactly its events
    pub fn new(proto: Miniblock) -> RelayResult<Self> {
        let header_event = Arc::new(parse(&proto.header)?);
        let header = header_event
            .payload()
            .miniblock_header()
            .cloned()
            .ok_or_else(|| Error::bad_block("header event lacks a header payload"))?;
        let events = parse_many(&proto.events)?;
        if header.event_hashes.len() != events.len()
            || header
                .event_hashes
                .iter()
                .zip(events.iter())
                .any(|(h, e)| *h != e.hash)
        {
            return Err(Error::bad_block(format!(
                "block {} header does not match its events",
                header.miniblock_num
            )));
        }
        Ok(Self {
            header_event,
            events,
            proto,
            header,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> RelayResult<Self> {
        Self::new(Miniblock::from_bytes(bytes)?)
    }

    /// Sign a header and assemble the block around already parsed events
    pub fn seal(
        wallet: &Wallet,
        header: MiniblockHeader,
        events: Vec<Arc<ParsedEvent>>,
    ) -> RelayResult<Self> {
        let payload = Payload::MiniblockHeader(Box::new(header.clone()));
        let header_event = make_parsed_event(wallet, payload, vec![])?;
        let proto = make_miniblock(&header_event, &events)?;
        Ok(Self {
            header_event,
            events,
            proto,
            header,
        })
    }

    pub fn header(&self) -> &MiniblockHeader {
        &self.header
    }

    pub fn num(&self) -> u64 {
        self.header.miniblock_num
    }

    pub fn hash(&self) -> EventHash {
        self.header_event.hash
    }

    pub fn has_snapshot(&self) -> bool {
        self.header.snapshot.is_some()
    }

    pub fn to_bytes(&self) -> RelayResult<Bytes> {
        self.proto.to_bytes()
    }
}
