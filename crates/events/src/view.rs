//! Immutable point-in-time view of one stream
//!
//! A [`StreamView`] holds the sealed blocks since (and a few before) the most
//! recent snapshot, the pending minipool, the snapshot derived from the sealed
//! blocks, and the DAG heads. Every mutator returns a new view; unchanged
//! parts are shared with the old one behind `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::cookie::SyncCookie;
use crate::dag;
use crate::error::{Error, RelayResult};
use crate::event::{Envelope, ParsedEvent, parse_many};
use crate::hash::EventHash;
use crate::miniblock::{
    Miniblock, MiniblockHeader, MiniblockInfo, make_genesis_header, next_miniblock_timestamp,
};
use crate::minipool::Minipool;
use crate::payload::{Inception, MembershipOp, StreamSettings};
use crate::snapshot::{self, Snapshot, SnapshotContent};
use crate::stream_id::{StreamId, StreamKind};
use crate::wallet::Address;

/// Candidate for the next miniblock, computed without mutating the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniblockProposal {
    /// Header hash of the block this one follows; `None` for genesis
    pub prev_miniblock_hash: Option<EventHash>,
    pub event_hashes: Vec<EventHash>,
    pub new_miniblock_num: u64,
    pub should_snapshot: bool,
}

/// Operational counters for a view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamViewStats {
    pub first_miniblock_num: Option<u64>,
    pub last_miniblock_num: Option<u64>,
    pub events_in_minipool: usize,
    /// Sealed event envelopes in the window; header envelopes are not counted
    pub events_in_miniblocks: usize,
    pub snapshots_in_miniblocks: usize,
    pub total_events_ever: u64,
}

#[derive(Debug, Clone)]
pub struct StreamView {
    stream_id: StreamId,
    blocks: Arc<Vec<Arc<MiniblockInfo>>>,
    snapshot_index: usize,
    minipool: Arc<Minipool>,
    snapshot: Arc<Snapshot>,
    index: Arc<HashMap<EventHash, Arc<ParsedEvent>>>,
    leaves: Arc<BTreeSet<EventHash>>,
}

impl StreamView {
    /// Build an unsealed view from a bag of envelopes in any order.
    ///
    /// All events land in a generation 0 minipool; proposing on the result
    /// yields the genesis block.
    pub fn build(envelopes: &[Envelope]) -> RelayResult<Self> {
        let parsed = parse_many(envelopes)?;
        let ordered = dag::topological_sort(&parsed)?;
        let first = ordered
            .first()
            .ok_or_else(|| Error::bad_event("stream needs at least one event"))?;
        let inception = first
            .payload()
            .inception()
            .ok_or_else(|| Error::bad_event("first event in causal order is not an inception"))?;
        let stream_id = inception.stream_id().clone();
        check_stream_kind(&stream_id, inception)?;
        for event in &ordered[1..] {
            if event.payload().is_inception() || event.is_miniblock_header() {
                return Err(Error::bad_event(format!(
                    "event {} must not be an inception or header",
                    event.hash.short()
                )));
            }
        }

        let leaves: BTreeSet<EventHash> = dag::frontier(&[], ordered.iter().map(Arc::as_ref))
            .into_iter()
            .collect();
        if leaves.is_empty() {
            return Err(Error::bad_event("event graph has no heads"));
        }

        let snapshot = Snapshot::genesis(std::slice::from_ref(first))?;
        let index = ordered.iter().map(|e| (e.hash, Arc::clone(e))).collect();
        Ok(Self {
            stream_id,
            blocks: Arc::new(Vec::new()),
            snapshot_index: 0,
            minipool: Arc::new(Minipool::new(0, ordered)),
            snapshot: Arc::new(snapshot),
            index: Arc::new(index),
            leaves: Arc::new(leaves),
        })
    }

    /// Build a view from persisted state: contiguous sealed blocks containing
    /// at least one snapshot block, plus the pending minipool events in slot
    /// order.
    pub fn load(
        stream_id: &StreamId,
        blocks: Vec<MiniblockInfo>,
        minipool_events: Vec<Arc<ParsedEvent>>,
        config: &StreamConfig,
    ) -> RelayResult<Self> {
        if blocks.is_empty() {
            return Err(Error::bad_block(format!("no miniblocks for stream {stream_id}")));
        }
        for pair in blocks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let linked = next.header().prev_miniblock_hash == Some(prev.hash());
            if next.num() != prev.num() + 1 || !linked {
                return Err(Error::bad_block(format!(
                    "stream {} block {} does not follow block {}",
                    stream_id,
                    next.num(),
                    prev.num()
                )));
            }
        }

        let Some(snapshot_pos) = blocks.iter().rposition(MiniblockInfo::has_snapshot) else {
            return Err(Error::bad_block(format!(
                "stream {stream_id} window has no snapshot block"
            )));
        };
        let start = snapshot_pos.saturating_sub(config.recency_generations);
        let blocks: Vec<Arc<MiniblockInfo>> =
            blocks.into_iter().skip(start).map(Arc::new).collect();
        let snapshot_index = snapshot_pos - start;

        let snapshot_block = &blocks[snapshot_index];
        let mut snapshot = snapshot_block
            .header()
            .snapshot
            .clone()
            .ok_or_else(|| Error::internal("snapshot block lost its snapshot"))?;
        if snapshot.content.inception().stream_id() != stream_id {
            return Err(Error::bad_stream_id(format!(
                "stored stream {} names itself {}",
                stream_id,
                snapshot.content.inception().stream_id()
            )));
        }
        for block in &blocks[snapshot_index + 1..] {
            fold_block(&mut snapshot, block, stream_id);
        }

        let mut index: HashMap<EventHash, Arc<ParsedEvent>> = HashMap::new();
        let window = blocks
            .iter()
            .flat_map(|b| b.events.iter())
            .chain(minipool_events.iter());
        for event in window {
            if index.insert(event.hash, Arc::clone(event)).is_some() {
                return Err(Error::bad_event(format!(
                    "duplicate event {} in stream {}",
                    event.hash, stream_id
                )));
            }
        }
        for event in &minipool_events {
            if event.payload().is_inception() || event.is_miniblock_header() {
                return Err(Error::bad_event(format!(
                    "pending event {} must not be an inception or header",
                    event.hash.short()
                )));
            }
        }

        // Only a window starting at genesis can vouch for every predecessor.
        if blocks[0].num() == 0 {
            for event in index.values() {
                for prev in event.prev_event_hashes() {
                    if !index.contains_key(prev) {
                        return Err(Error::bad_event(format!(
                            "event {} references missing predecessor {}",
                            event.hash, prev
                        )));
                    }
                }
            }
        }

        let after_snapshot = blocks[snapshot_index + 1..]
            .iter()
            .flat_map(|b| b.events.iter())
            .chain(minipool_events.iter())
            .map(Arc::as_ref);
        let base = snapshot_block
            .header()
            .snapshot
            .as_ref()
            .map(|s| s.leaf_hashes.clone())
            .unwrap_or_default();
        let leaves: BTreeSet<EventHash> =
            dag::frontier(&base, after_snapshot).into_iter().collect();
        if leaves.is_empty() {
            return Err(Error::bad_event(format!("stream {stream_id} has no heads")));
        }

        let generation = blocks[blocks.len() - 1].num() + 1;
        debug!(
            "Loaded view of {} at generation {} with {} pending events",
            stream_id,
            generation,
            minipool_events.len()
        );
        Ok(Self {
            stream_id: stream_id.clone(),
            blocks: Arc::new(blocks),
            snapshot_index,
            minipool: Arc::new(Minipool::new(generation, minipool_events)),
            snapshot: Arc::new(snapshot),
            index: Arc::new(index),
            leaves: Arc::new(leaves),
        })
    }

    /// New view with one more pending event.
    ///
    /// Rejects headers, inceptions, payloads of another stream kind,
    /// duplicates, and predecessors that are neither in the window nor a
    /// known head.
    pub fn add_event(&self, event: Arc<ParsedEvent>) -> RelayResult<Self> {
        if event.is_miniblock_header() {
            return Err(Error::bad_event("miniblock header cannot be added as an event"));
        }
        if event.payload().is_inception() {
            return Err(Error::bad_event("inception event may only appear first"));
        }
        if let Some(kind) = event.payload().stream_kind() {
            if kind != self.kind() {
                return Err(Error::bad_event(format!(
                    "{} payload cannot be added to {} stream {}",
                    kind,
                    self.kind(),
                    self.stream_id
                )));
            }
        }
        if self.index.contains_key(&event.hash) {
            return Err(Error::bad_event(format!("duplicate event {}", event.hash)));
        }
        for prev in event.prev_event_hashes() {
            if !self.index.contains_key(prev) && !self.leaves.contains(prev) {
                return Err(Error::bad_event(format!(
                    "event {} references missing predecessor {}",
                    event.hash, prev
                )));
            }
        }

        let mut leaves = (*self.leaves).clone();
        for prev in event.prev_event_hashes() {
            leaves.remove(prev);
        }
        leaves.insert(event.hash);

        let mut index = (*self.index).clone();
        index.insert(event.hash, Arc::clone(&event));

        Ok(Self {
            stream_id: self.stream_id.clone(),
            blocks: Arc::clone(&self.blocks),
            snapshot_index: self.snapshot_index,
            minipool: Arc::new(self.minipool.copy_and_add(event)),
            snapshot: Arc::clone(&self.snapshot),
            index: Arc::new(index),
            leaves: Arc::new(leaves),
        })
    }

    /// Propose sealing the current minipool; `None` when there is nothing to
    /// seal and no snapshot is forced
    pub fn propose_next_miniblock(
        &self,
        config: &StreamConfig,
        force_snapshot: bool,
    ) -> Option<MiniblockProposal> {
        if self.minipool.is_empty() && !force_snapshot {
            return None;
        }
        Some(MiniblockProposal {
            prev_miniblock_hash: self.last_block().map(|b| b.hash()),
            event_hashes: self.minipool.events().iter().map(|e| e.hash).collect(),
            new_miniblock_num: self.minipool.generation(),
            should_snapshot: force_snapshot
                || self.last_block().is_none()
                || self.should_snapshot(config),
        })
    }

    fn should_snapshot(&self, config: &StreamConfig) -> bool {
        let threshold = config.min_events_per_snapshot(self.kind());
        let mut count = self.minipool.len();
        if count >= threshold {
            return true;
        }
        for block in self.blocks.iter().rev() {
            if block.has_snapshot() {
                break;
            }
            count += block.events.len();
            if count >= threshold {
                return true;
            }
        }
        false
    }

    /// Header and sealed events for a proposal made against this view or an
    /// earlier one of the same generation
    pub fn make_miniblock_header(
        &self,
        proposal: &MiniblockProposal,
    ) -> RelayResult<(MiniblockHeader, Vec<Arc<ParsedEvent>>)> {
        let last = self.last_block();
        if proposal.new_miniblock_num != self.minipool.generation()
            || proposal.prev_miniblock_hash != last.map(|b| b.hash())
        {
            return Err(Error::bad_block(format!(
                "proposal for block {} does not match generation {} of {}",
                proposal.new_miniblock_num,
                self.minipool.generation(),
                self.stream_id
            )));
        }

        let mut events = Vec::with_capacity(proposal.event_hashes.len());
        for hash in &proposal.event_hashes {
            let event = self.minipool.get(hash).ok_or_else(|| {
                Error::minipool_missing_events(format!("proposal event {hash} not in minipool"))
            })?;
            events.push(Arc::clone(event));
        }

        let Some(last) = last else {
            let header = make_genesis_header(&events)?;
            return Ok((header, events));
        };

        let last_header = last.header();
        let event_num_offset = last_header.event_num_offset + last.events.len() as u64;
        let miniblock_num = last_header.miniblock_num + 1;
        let prev_snapshot_miniblock_num = if last.has_snapshot() {
            last_header.miniblock_num
        } else {
            last_header.prev_snapshot_miniblock_num
        };

        let snapshot = if proposal.should_snapshot {
            let mut snapshot = (*self.snapshot).clone();
            for (i, event) in events.iter().enumerate() {
                let event_num = event_num_offset + i as u64;
                if let Err(err) = snapshot::apply(&mut snapshot, event, miniblock_num, event_num) {
                    warn!(
                        "Failed to update snapshot of {} with event {}: {}",
                        self.stream_id,
                        event.hash.short(),
                        err
                    );
                }
            }
            snapshot.leaf_hashes =
                dag::frontier(&self.sealed_frontier(), events.iter().map(Arc::as_ref));
            Some(snapshot)
        } else {
            None
        };

        let header = MiniblockHeader {
            miniblock_num,
            timestamp: next_miniblock_timestamp(Some(last_header.timestamp)),
            event_hashes: events.iter().map(|e| e.hash).collect(),
            prev_miniblock_hash: Some(last.hash()),
            snapshot,
            event_num_offset,
            prev_snapshot_miniblock_num,
        };
        Ok((header, events))
    }

    /// Heads of the sealed part of the window
    fn sealed_frontier(&self) -> Vec<EventHash> {
        let Some(snapshot_block) = self.blocks.get(self.snapshot_index) else {
            return Vec::new();
        };
        let base = snapshot_block
            .header()
            .snapshot
            .as_ref()
            .map(|s| s.leaf_hashes.clone())
            .unwrap_or_default();
        let sealed = self.blocks[self.snapshot_index + 1..]
            .iter()
            .flat_map(|b| b.events.iter())
            .map(Arc::as_ref);
        dag::frontier(&base, sealed)
    }

    /// New view with a sealed block appended.
    ///
    /// The block must follow the last sealed block and every event it seals
    /// must be pending here. Pending events it does not seal carry over into
    /// the next generation.
    pub fn apply_block(
        &self,
        block: Arc<MiniblockInfo>,
        config: &StreamConfig,
    ) -> RelayResult<Self> {
        let header = block.header();
        match self.last_block() {
            Some(last) => {
                if header.miniblock_num != last.num() + 1 {
                    return Err(Error::bad_block(format!(
                        "expected block {} for {}, got {}",
                        last.num() + 1,
                        self.stream_id,
                        header.miniblock_num
                    )));
                }
                if header.prev_miniblock_hash != Some(last.hash()) {
                    return Err(Error::bad_block(format!(
                        "block {} of {} does not link to {}",
                        header.miniblock_num,
                        self.stream_id,
                        last.hash()
                    )));
                }
            }
            None => {
                if header.miniblock_num != 0
                    || header.prev_miniblock_hash.is_some()
                    || header.snapshot.is_none()
                {
                    return Err(Error::bad_block(format!(
                        "first block of {} must be genesis",
                        self.stream_id
                    )));
                }
            }
        }

        let mut sealed = BTreeSet::new();
        for event in &block.events {
            if !self.minipool.contains(&event.hash) || !sealed.insert(event.hash) {
                return Err(Error::bad_block(format!(
                    "block {} seals event {} that is not pending in {}",
                    header.miniblock_num, event.hash, self.stream_id
                )));
            }
        }
        let remaining: Vec<Arc<ParsedEvent>> = self
            .minipool
            .events()
            .iter()
            .filter(|e| !sealed.contains(&e.hash))
            .cloned()
            .collect();
        let minipool = Minipool::with_instance(
            header.miniblock_num + 1,
            self.minipool.instance_id(),
            remaining,
        );

        let (blocks, snapshot_index, snapshot, index) = match &header.snapshot {
            Some(snapshot) => {
                let start = self.blocks.len().saturating_sub(config.recency_generations);
                let mut blocks: Vec<Arc<MiniblockInfo>> = self.blocks[start..].to_vec();
                blocks.push(Arc::clone(&block));
                let snapshot_index = blocks.len() - 1;
                let index = if start == 0 {
                    Arc::clone(&self.index)
                } else {
                    let mut index = (*self.index).clone();
                    for dropped in &self.blocks[..start] {
                        for event in &dropped.events {
                            index.remove(&event.hash);
                        }
                    }
                    Arc::new(index)
                };
                (blocks, snapshot_index, snapshot.clone(), index)
            }
            None => {
                let mut blocks = (*self.blocks).clone();
                blocks.push(Arc::clone(&block));
                let mut snapshot = (*self.snapshot).clone();
                fold_block(&mut snapshot, &block, &self.stream_id);
                (blocks, self.snapshot_index, snapshot, Arc::clone(&self.index))
            }
        };

        Ok(Self {
            stream_id: self.stream_id.clone(),
            blocks: Arc::new(blocks),
            snapshot_index,
            minipool: Arc::new(minipool),
            snapshot: Arc::new(snapshot),
            index,
            leaves: Arc::clone(&self.leaves),
        })
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn kind(&self) -> StreamKind {
        self.stream_id.kind()
    }

    pub fn blocks(&self) -> &[Arc<MiniblockInfo>] {
        &self.blocks
    }

    pub fn last_block(&self) -> Option<&Arc<MiniblockInfo>> {
        self.blocks.last()
    }

    pub fn minipool(&self) -> &Minipool {
        &self.minipool
    }

    /// Snapshot derived from every sealed block in the window
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Events in the window in stream order: sealed blocks, then the minipool
    pub fn events(&self) -> impl Iterator<Item = &Arc<ParsedEvent>> {
        self.blocks
            .iter()
            .flat_map(|b| b.events.iter())
            .chain(self.minipool.events().iter())
    }

    pub fn get_event(&self, hash: &EventHash) -> Option<&Arc<ParsedEvent>> {
        self.index.get(hash)
    }

    pub fn inception_payload(&self) -> Inception<'_> {
        self.snapshot.content.inception()
    }

    /// The inception event, while it is still inside the window
    pub fn inception_event(&self) -> Option<&Arc<ParsedEvent>> {
        self.events().next().filter(|e| e.payload().is_inception())
    }

    pub fn settings(&self) -> &StreamSettings {
        self.snapshot.content.inception().settings()
    }

    pub fn leaf_hashes(&self) -> Vec<EventHash> {
        self.leaves.iter().copied().collect()
    }

    /// Users currently joined: the sealed snapshot plus pending membership events
    pub fn joined_users(&self) -> BTreeSet<String> {
        let mut memberships = self.snapshot.content.memberships().cloned().unwrap_or_default();
        for event in self.minipool.events() {
            if let Some(m) = event.payload().membership() {
                memberships.insert(m.user_id.clone(), m.op);
            }
        }
        memberships
            .into_iter()
            .filter(|(_, op)| *op == MembershipOp::Join)
            .map(|(user, _)| user)
            .collect()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        match &self.snapshot.content {
            SnapshotContent::Space(_) | SnapshotContent::Channel(_) | SnapshotContent::Gdm(_) => {
                self.joined_users().contains(user_id)
            }
            SnapshotContent::Dm(dm) => {
                dm.inception.first_party_id == user_id || dm.inception.second_party_id == user_id
            }
            SnapshotContent::User(_)
            | SnapshotContent::UserSettings(_)
            | SnapshotContent::UserToDevice(_)
            | SnapshotContent::UserDeviceKey(_) => self.stream_id.suffix() == user_id,
            SnapshotContent::Media(media) => media.creator_id == user_id,
        }
    }

    /// Space of a channel, or channel of a media stream
    pub fn stream_parent_id(&self) -> Option<&StreamId> {
        match &self.snapshot.content {
            SnapshotContent::Channel(channel) => Some(&channel.inception.space_id),
            SnapshotContent::Media(media) => Some(&media.inception.channel_id),
            _ => None,
        }
    }

    pub fn minipool_envelopes(&self) -> Vec<Envelope> {
        self.minipool
            .events()
            .iter()
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// Sealed blocks from the latest snapshot block onwards
    pub fn miniblocks_from_last_snapshot(&self) -> Vec<Miniblock> {
        self.blocks
            .get(self.snapshot_index..)
            .unwrap_or_default()
            .iter()
            .map(|b| b.proto.clone())
            .collect()
    }

    /// Resumption point just after everything in this view
    pub fn sync_cookie(&self, node_address: Address) -> SyncCookie {
        SyncCookie {
            node_address,
            stream_id: self.stream_id.clone(),
            miniblock_num: self.minipool.generation(),
            minipool_instance_id: self.minipool.instance_id(),
            minipool_slot: self.minipool.len() as u64,
            prev_miniblock_hash: self
                .last_block()
                .map(|b| b.hash())
                .unwrap_or(EventHash::ZERO),
        }
    }

    pub fn stats(&self) -> StreamViewStats {
        let mut stats = StreamViewStats {
            first_miniblock_num: self.blocks.first().map(|b| b.num()),
            last_miniblock_num: self.last_block().map(|b| b.num()),
            events_in_minipool: self.minipool.len(),
            ..Default::default()
        };
        for block in self.blocks.iter() {
            stats.events_in_miniblocks += block.events.len();
            if block.has_snapshot() {
                stats.snapshots_in_miniblocks += 1;
            }
        }
        let sealed_ever = self
            .last_block()
            .map(|b| b.header().event_num_offset + b.events.len() as u64)
            .unwrap_or(0);
        stats.total_events_ever = sealed_ever + self.minipool.len() as u64;
        stats
    }
}

fn check_stream_kind(stream_id: &StreamId, inception: Inception<'_>) -> RelayResult<()> {
    if stream_id.kind() != inception.kind() {
        return Err(Error::bad_stream_id(format!(
            "stream id {} does not match {} inception",
            stream_id,
            inception.kind()
        )));
    }
    Ok(())
}

fn fold_block(snapshot: &mut Snapshot, block: &MiniblockInfo, stream_id: &StreamId) {
    let offset = block.header().event_num_offset;
    for (i, event) in block.events.iter().enumerate() {
        if let Err(err) = snapshot::apply(snapshot, event, block.num(), offset + i as u64) {
            warn!(
                "Failed to update snapshot of {} with sealed event {}: {}",
                stream_id,
                event.hash.short(),
                err
            );
        }
    }
}
