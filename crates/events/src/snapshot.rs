//! Per-stream-kind state materialized by replaying events
//!
//! The snapshot shape is fixed by the inception payload. Every later event is
//! folded in by [`apply`], which dispatches on (stream kind, event kind). Maps
//! are ordered so a snapshot always encodes to the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, RelayResult};
use crate::event::ParsedEvent;
use crate::hash::EventHash;
use crate::payload::{
    ChannelInception, ChannelOp, ChannelPayload, CommonPayload, DmInception, DmPayload,
    EncryptedData, EncryptionDevice, GdmInception, GdmPayload, Inception, KeyFulfillment,
    KeySolicitation, MediaInception, MediaPayload, Membership, MembershipOp, Payload,
    SpaceInception, SpacePayload, UserDeviceKeyPayload, UserInception, UserPayload,
    UserSettingsPayload, UserToDevicePayload,
};
use crate::stream_id::{StreamId, StreamKind};

/// Maximum number of device records and solicitations kept per user
pub const MAX_DEVICES: usize = 10;

/// User-to-device summaries further behind than this many generations are dropped
pub const MAX_DEVICE_SUMMARY_GENERATIONS: u64 = 3600;

/// Encrypted value tagged with the global number of the event that set it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedEncryptedData {
    pub data: EncryptedData,
    pub event_num: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub op: ChannelOp,
    pub properties: Option<EncryptedData>,
    pub event_num: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSnapshot {
    pub inception: SpaceInception,
    pub memberships: BTreeMap<String, MembershipOp>,
    pub channels: BTreeMap<StreamId, ChannelDescriptor>,
    pub usernames: BTreeMap<String, WrappedEncryptedData>,
    pub display_names: BTreeMap<String, WrappedEncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub inception: ChannelInception,
    pub memberships: BTreeMap<String, MembershipOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmSnapshot {
    pub inception: DmInception,
    pub memberships: BTreeMap<String, MembershipOp>,
    pub usernames: BTreeMap<String, WrappedEncryptedData>,
    pub display_names: BTreeMap<String, WrappedEncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdmSnapshot {
    pub inception: GdmInception,
    pub memberships: BTreeMap<String, MembershipOp>,
    pub usernames: BTreeMap<String, WrappedEncryptedData>,
    pub display_names: BTreeMap<String, WrappedEncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub inception: UserInception,
    /// stream id -> the user's last recorded membership op there
    pub memberships: BTreeMap<StreamId, MembershipOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettingsSnapshot {
    pub inception: UserInception,
    pub fully_read_markers: BTreeMap<StreamId, WrappedEncryptedData>,
    pub blocked_users: BTreeMap<String, bool>,
}

/// Range of generations holding undelivered messages for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub lower_bound: u64,
    pub upper_bound: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToDeviceSnapshot {
    pub inception: UserInception,
    pub device_summary: BTreeMap<String, DeviceSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeviceKeySnapshot {
    pub inception: UserInception,
    pub devices: Vec<EncryptionDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSnapshot {
    pub inception: MediaInception,
    pub creator_id: String,
}

/// Stream-kind specific part of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotContent {
    Space(SpaceSnapshot),
    Channel(ChannelSnapshot),
    Dm(DmSnapshot),
    Gdm(GdmSnapshot),
    User(UserSnapshot),
    UserSettings(UserSettingsSnapshot),
    UserToDevice(UserToDeviceSnapshot),
    UserDeviceKey(UserDeviceKeySnapshot),
    Media(MediaSnapshot),
}

impl SnapshotContent {
    /// Empty state for the stream kind an inception creates
    pub fn from_inception(inception: Inception<'_>, creator_id: &str) -> Self {
        match inception {
            Inception::Space(i) => SnapshotContent::Space(SpaceSnapshot {
                inception: i.clone(),
                memberships: BTreeMap::new(),
                channels: BTreeMap::new(),
                usernames: BTreeMap::new(),
                display_names: BTreeMap::new(),
            }),
            Inception::Channel(i) => SnapshotContent::Channel(ChannelSnapshot {
                inception: i.clone(),
                memberships: BTreeMap::new(),
            }),
            Inception::Dm(i) => SnapshotContent::Dm(DmSnapshot {
                inception: i.clone(),
                memberships: BTreeMap::new(),
                usernames: BTreeMap::new(),
                display_names: BTreeMap::new(),
            }),
            Inception::Gdm(i) => SnapshotContent::Gdm(GdmSnapshot {
                inception: i.clone(),
                memberships: BTreeMap::new(),
                usernames: BTreeMap::new(),
                display_names: BTreeMap::new(),
            }),
            Inception::User(i) => SnapshotContent::User(UserSnapshot {
                inception: i.clone(),
                memberships: BTreeMap::new(),
            }),
            Inception::UserSettings(i) => SnapshotContent::UserSettings(UserSettingsSnapshot {
                inception: i.clone(),
                fully_read_markers: BTreeMap::new(),
                blocked_users: BTreeMap::new(),
            }),
            Inception::UserToDevice(i) => SnapshotContent::UserToDevice(UserToDeviceSnapshot {
                inception: i.clone(),
                device_summary: BTreeMap::new(),
            }),
            Inception::UserDeviceKey(i) => {
                SnapshotContent::UserDeviceKey(UserDeviceKeySnapshot {
                    inception: i.clone(),
                    devices: Vec::new(),
                })
            }
            Inception::Media(i) => SnapshotContent::Media(MediaSnapshot {
                inception: i.clone(),
                creator_id: creator_id.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.inception().kind()
    }

    pub fn inception(&self) -> Inception<'_> {
        match self {
            SnapshotContent::Space(s) => Inception::Space(&s.inception),
            SnapshotContent::Channel(s) => Inception::Channel(&s.inception),
            SnapshotContent::Dm(s) => Inception::Dm(&s.inception),
            SnapshotContent::Gdm(s) => Inception::Gdm(&s.inception),
            SnapshotContent::User(s) => Inception::User(&s.inception),
            SnapshotContent::UserSettings(s) => Inception::UserSettings(&s.inception),
            SnapshotContent::UserToDevice(s) => Inception::UserToDevice(&s.inception),
            SnapshotContent::UserDeviceKey(s) => Inception::UserDeviceKey(&s.inception),
            SnapshotContent::Media(s) => Inception::Media(&s.inception),
        }
    }

    /// Membership map for stream kinds that track one
    pub fn memberships(&self) -> Option<&BTreeMap<String, MembershipOp>> {
        match self {
            SnapshotContent::Space(s) => Some(&s.memberships),
            SnapshotContent::Channel(s) => Some(&s.memberships),
            SnapshotContent::Dm(s) => Some(&s.memberships),
            SnapshotContent::Gdm(s) => Some(&s.memberships),
            _ => None,
        }
    }
}

/// Materialized state of a stream as of some sealed miniblock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: SnapshotContent,
    /// user id -> open key solicitations from that user's devices
    pub solicitations: BTreeMap<String, Vec<KeySolicitation>>,
    /// DAG heads as of the block carrying this snapshot, sorted
    pub leaf_hashes: Vec<EventHash>,
}

impl Snapshot {
    /// Build the genesis snapshot: state from `events[0]`'s inception with
    /// the remaining genesis events folded in.
    pub fn genesis(events: &[std::sync::Arc<ParsedEvent>]) -> RelayResult<Self> {
        let first = events
            .first()
            .ok_or_else(|| Error::bad_event("genesis requires at least one event"))?;
        let inception = first
            .payload()
            .inception()
            .ok_or_else(|| Error::bad_event("first genesis event must be an inception"))?;
        let mut snapshot = Snapshot {
            content: SnapshotContent::from_inception(inception, &first.creator_user_id()),
            solicitations: BTreeMap::new(),
            leaf_hashes: Vec::new(),
        };
        for (i, event) in events.iter().enumerate().skip(1) {
            apply(&mut snapshot, event, 0, i as u64)?;
        }
        Ok(snapshot)
    }

    pub fn kind(&self) -> StreamKind {
        self.content.kind()
    }

    /// Users whose last membership op is a join
    pub fn joined_users(&self) -> Vec<String> {
        self.content
            .memberships()
            .map(|m| {
                m.iter()
                    .filter(|(_, op)| **op == MembershipOp::Join)
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fold one event into a snapshot.
///
/// `miniblock_num` is the block the event is sealed into and `event_num` its
/// global position in the stream.
pub fn apply(
    snapshot: &mut Snapshot,
    event: &ParsedEvent,
    miniblock_num: u64,
    event_num: u64,
) -> RelayResult<()> {
    let creator = event.creator_user_id();
    match (&mut snapshot.content, event.payload()) {
        (_, Payload::MiniblockHeader(_)) => {
            Err(Error::bad_event("miniblock header cannot update a snapshot"))
        }
        (_, Payload::Common(payload)) => {
            update_common(&mut snapshot.solicitations, payload, &creator);
            Ok(())
        }
        (SnapshotContent::Space(s), Payload::Space(p)) => update_space(s, p, &creator, event_num),
        (SnapshotContent::Channel(s), Payload::Channel(p)) => update_channel(s, p),
        (SnapshotContent::Dm(s), Payload::Dm(p)) => update_dm(s, p, &creator, event_num),
        (SnapshotContent::Gdm(s), Payload::Gdm(p)) => update_gdm(s, p, &creator, event_num),
        (SnapshotContent::User(s), Payload::User(p)) => update_user(s, p),
        (SnapshotContent::UserSettings(s), Payload::UserSettings(p)) => {
            update_user_settings(s, p, event_num)
        }
        (SnapshotContent::UserToDevice(s), Payload::UserToDevice(p)) => {
            update_user_to_device(s, p, miniblock_num)
        }
        (SnapshotContent::UserDeviceKey(s), Payload::UserDeviceKey(p)) => {
            update_user_device_key(s, p)
        }
        (SnapshotContent::Media(s), Payload::Media(p)) => update_media(s, p),
        (content, payload) => Err(Error::bad_event(format!(
            "{} payload cannot update a {} snapshot",
            payload
                .stream_kind()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            content.kind()
        ))),
    }
}

fn inception_recurrence() -> Error {
    Error::bad_event("inception event may only appear first")
}

fn upsert_membership(memberships: &mut BTreeMap<String, MembershipOp>, membership: &Membership) {
    memberships.insert(membership.user_id.clone(), membership.op);
}

fn wrap(data: &EncryptedData, event_num: u64) -> WrappedEncryptedData {
    WrappedEncryptedData {
        data: data.clone(),
        event_num,
    }
}

fn update_space(
    snapshot: &mut SpaceSnapshot,
    payload: &SpacePayload,
    creator: &str,
    event_num: u64,
) -> RelayResult<()> {
    match payload {
        SpacePayload::Inception(_) => return Err(inception_recurrence()),
        SpacePayload::Membership(m) => upsert_membership(&mut snapshot.memberships, m),
        SpacePayload::Channel(update) => {
            snapshot.channels.insert(
                update.channel_id.clone(),
                ChannelDescriptor {
                    op: update.op,
                    properties: update.properties.clone(),
                    event_num,
                },
            );
        }
        SpacePayload::Username(data) => {
            snapshot
                .usernames
                .insert(creator.to_string(), wrap(data, event_num));
        }
        SpacePayload::DisplayName(data) => {
            snapshot
                .display_names
                .insert(creator.to_string(), wrap(data, event_num));
        }
    }
    Ok(())
}

fn update_channel(snapshot: &mut ChannelSnapshot, payload: &ChannelPayload) -> RelayResult<()> {
    match payload {
        ChannelPayload::Inception(_) => return Err(inception_recurrence()),
        ChannelPayload::Membership(m) => upsert_membership(&mut snapshot.memberships, m),
        ChannelPayload::Message(_) => {}
    }
    Ok(())
}

fn update_dm(
    snapshot: &mut DmSnapshot,
    payload: &DmPayload,
    creator: &str,
    event_num: u64,
) -> RelayResult<()> {
    match payload {
        DmPayload::Inception(_) => return Err(inception_recurrence()),
        DmPayload::Membership(m) => upsert_membership(&mut snapshot.memberships, m),
        DmPayload::Message(_) => {}
        DmPayload::Username(data) => {
            snapshot
                .usernames
                .insert(creator.to_string(), wrap(data, event_num));
        }
        DmPayload::DisplayName(data) => {
            snapshot
                .display_names
                .insert(creator.to_string(), wrap(data, event_num));
        }
    }
    Ok(())
}

fn update_gdm(
    snapshot: &mut GdmSnapshot,
    payload: &GdmPayload,
    creator: &str,
    event_num: u64,
) -> RelayResult<()> {
    match payload {
        GdmPayload::Inception(_) => return Err(inception_recurrence()),
        GdmPayload::Membership(m) => upsert_membership(&mut snapshot.memberships, m),
        GdmPayload::Message(_) => {}
        GdmPayload::Username(data) => {
            snapshot
                .usernames
                .insert(creator.to_string(), wrap(data, event_num));
        }
        GdmPayload::DisplayName(data) => {
            snapshot
                .display_names
                .insert(creator.to_string(), wrap(data, event_num));
        }
    }
    Ok(())
}

fn update_user(snapshot: &mut UserSnapshot, payload: &UserPayload) -> RelayResult<()> {
    match payload {
        UserPayload::Inception(_) => Err(inception_recurrence()),
        UserPayload::UserMembership(m) => {
            snapshot.memberships.insert(m.stream_id.clone(), m.op);
            Ok(())
        }
    }
}

fn update_user_settings(
    snapshot: &mut UserSettingsSnapshot,
    payload: &UserSettingsPayload,
    event_num: u64,
) -> RelayResult<()> {
    match payload {
        UserSettingsPayload::Inception(_) => return Err(inception_recurrence()),
        UserSettingsPayload::FullyReadMarkers(markers) => {
            snapshot.fully_read_markers.insert(
                markers.channel_id.clone(),
                wrap(&markers.content, event_num),
            );
        }
        UserSettingsPayload::UserBlocked(blocked) => {
            snapshot
                .blocked_users
                .insert(blocked.user_id.clone(), blocked.blocked);
        }
    }
    Ok(())
}

fn update_user_to_device(
    snapshot: &mut UserToDeviceSnapshot,
    payload: &UserToDevicePayload,
    miniblock_num: u64,
) -> RelayResult<()> {
    match payload {
        UserToDevicePayload::Inception(_) => return Err(inception_recurrence()),
        UserToDevicePayload::Message(message) => {
            for device_key in message.ciphertexts.keys() {
                snapshot
                    .device_summary
                    .entry(device_key.clone())
                    .and_modify(|summary| summary.upper_bound = miniblock_num)
                    .or_insert(DeviceSummary {
                        lower_bound: miniblock_num,
                        upper_bound: miniblock_num,
                    });
            }
        }
        UserToDevicePayload::Ack(ack) => {
            let fully_acked = match snapshot.device_summary.get_mut(&ack.device_key) {
                Some(summary) if summary.upper_bound <= ack.miniblock_num => true,
                Some(summary) => {
                    summary.lower_bound = ack.miniblock_num + 1;
                    false
                }
                None => false,
            };
            if fully_acked {
                snapshot.device_summary.remove(&ack.device_key);
            }
        }
    }
    cleanup_device_summary(snapshot, miniblock_num);
    Ok(())
}

fn cleanup_device_summary(snapshot: &mut UserToDeviceSnapshot, current_miniblock_num: u64) {
    snapshot.device_summary.retain(|_, summary| {
        current_miniblock_num.saturating_sub(summary.lower_bound) <= MAX_DEVICE_SUMMARY_GENERATIONS
    });
}

fn update_user_device_key(
    snapshot: &mut UserDeviceKeySnapshot,
    payload: &UserDeviceKeyPayload,
) -> RelayResult<()> {
    match payload {
        UserDeviceKeyPayload::Inception(_) => Err(inception_recurrence()),
        UserDeviceKeyPayload::EncryptionDevice(device) => {
            insert_device(&mut snapshot.devices, device.clone());
            Ok(())
        }
    }
}

/// Replace a device with the same key in place, otherwise append, keeping at
/// most [`MAX_DEVICES`] by dropping the oldest.
fn insert_device(devices: &mut Vec<EncryptionDevice>, device: EncryptionDevice) {
    if let Some(existing) = devices
        .iter_mut()
        .find(|d| d.device_key == device.device_key)
    {
        *existing = device;
        return;
    }
    if devices.len() >= MAX_DEVICES {
        let excess = devices.len() + 1 - MAX_DEVICES;
        devices.drain(..excess);
    }
    devices.push(device);
}

fn update_media(_snapshot: &mut MediaSnapshot, payload: &MediaPayload) -> RelayResult<()> {
    match payload {
        MediaPayload::Inception(_) => Err(inception_recurrence()),
        MediaPayload::Chunk(_) => Ok(()),
    }
}

fn update_common(
    solicitations: &mut BTreeMap<String, Vec<KeySolicitation>>,
    payload: &CommonPayload,
    creator: &str,
) {
    match payload {
        CommonPayload::KeySolicitation(solicitation) => {
            let list = solicitations.entry(creator.to_string()).or_default();
            apply_key_solicitation(list, solicitation);
        }
        CommonPayload::KeyFulfillment(fulfillment) => {
            if let Some(list) = solicitations.get_mut(&fulfillment.user_id) {
                apply_key_fulfillment(list, fulfillment);
                if list.is_empty() {
                    solicitations.remove(&fulfillment.user_id);
                }
            }
        }
    }
}

fn apply_key_solicitation(list: &mut Vec<KeySolicitation>, solicitation: &KeySolicitation) {
    list.retain(|s| s.device_key != solicitation.device_key);
    let mut solicitation = solicitation.clone();
    solicitation.session_ids.sort();
    solicitation.session_ids.dedup();
    if list.len() >= MAX_DEVICES {
        let excess = list.len() + 1 - MAX_DEVICES;
        list.drain(..excess);
    }
    list.push(solicitation);
}

fn apply_key_fulfillment(list: &mut Vec<KeySolicitation>, fulfillment: &KeyFulfillment) {
    let Some(index) = list
        .iter()
        .position(|s| s.device_key == fulfillment.device_key)
    else {
        return;
    };
    let mut fulfilled = fulfillment.session_ids.clone();
    fulfilled.sort();
    let solicitation = &mut list[index];
    solicitation.session_ids = remove_common(&solicitation.session_ids, &fulfilled);
    solicitation.is_new_device = false;
    if solicitation.session_ids.is_empty() {
        list.remove(index);
    }
}

/// Elements of sorted `x` not present in sorted `y`
fn remove_common(x: &[String], y: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(x.len());
    let (mut i, mut j) = (0, 0);
    while i < x.len() && j < y.len() {
        match x[i].cmp(&y[j]) {
            std::cmp::Ordering::Less => {
                result.push(x[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    result.extend_from_slice(&x[i..]);
    result
}
