//! Event payloads, keyed first by stream kind and then by event kind

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::miniblock::MiniblockHeader;
use crate::stream_id::{StreamId, StreamKind};

/// Per-stream settings fixed at inception
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Skip periodic miniblock production for this stream
    pub disable_miniblock_creation: bool,
}

/// Membership transition for a user in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipOp {
    Invite,
    Join,
    Leave,
}

/// Membership event body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub op: MembershipOp,
    pub user_id: String,
}

/// Client-encrypted content; the node never inspects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub ciphertext: Bytes,
    pub algorithm: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOp {
    Created,
    Updated,
    Deleted,
}

/// Space event announcing a change to one of its channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub op: ChannelOp,
    pub channel_id: StreamId,
    pub properties: Option<EncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInception {
    pub stream_id: StreamId,
    pub settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpacePayload {
    Inception(SpaceInception),
    Membership(Membership),
    Channel(ChannelUpdate),
    Username(EncryptedData),
    DisplayName(EncryptedData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInception {
    pub stream_id: StreamId,
    pub space_id: StreamId,
    pub settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPayload {
    Inception(ChannelInception),
    Membership(Membership),
    Message(EncryptedData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmInception {
    pub stream_id: StreamId,
    pub first_party_id: String,
    pub second_party_id: String,
    pub settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmPayload {
    Inception(DmInception),
    Membership(Membership),
    Message(EncryptedData),
    Username(EncryptedData),
    DisplayName(EncryptedData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdmInception {
    pub stream_id: StreamId,
    pub settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdmPayload {
    Inception(GdmInception),
    Membership(Membership),
    Message(EncryptedData),
    Username(EncryptedData),
    DisplayName(EncryptedData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInception {
    pub stream_id: StreamId,
    pub settings: StreamSettings,
}

/// A user's own record of joining or leaving another stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembership {
    pub stream_id: StreamId,
    pub op: MembershipOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserPayload {
    Inception(UserInception),
    UserMembership(UserMembership),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullyReadMarkers {
    pub channel_id: StreamId,
    pub content: EncryptedData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBlocked {
    pub user_id: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSettingsPayload {
    Inception(UserInception),
    FullyReadMarkers(FullyReadMarkers),
    UserBlocked(UserBlocked),
}

/// Encrypted group sessions addressed to one or more devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCiphertexts {
    pub sender_key: String,
    pub session_ids: Vec<String>,
    /// device key -> ciphertext
    pub ciphertexts: std::collections::BTreeMap<String, Bytes>,
}

/// A device acknowledging delivery up to a miniblock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAck {
    pub device_key: String,
    pub miniblock_num: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserToDevicePayload {
    Inception(UserInception),
    Message(DeviceCiphertexts),
    Ack(DeviceAck),
}

/// One registered encryption device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionDevice {
    pub device_key: String,
    pub fallback_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDeviceKeyPayload {
    Inception(UserInception),
    EncryptionDevice(EncryptionDevice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInception {
    pub stream_id: StreamId,
    pub channel_id: StreamId,
    pub chunk_count: u32,
    pub settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub chunk_index: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaPayload {
    Inception(MediaInception),
    Chunk(MediaChunk),
}

/// A device asking other members for missing session keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySolicitation {
    pub device_key: String,
    pub fallback_key: String,
    pub is_new_device: bool,
    pub session_ids: Vec<String>,
}

/// A member answering a solicitation on behalf of `user_id`'s device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFulfillment {
    pub user_id: String,
    pub device_key: String,
    pub session_ids: Vec<String>,
}

/// Events valid in any stream kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommonPayload {
    KeySolicitation(KeySolicitation),
    KeyFulfillment(KeyFulfillment),
}

/// Tagged union of every event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    MiniblockHeader(Box<MiniblockHeader>),
    Space(SpacePayload),
    Channel(ChannelPayload),
    Dm(DmPayload),
    Gdm(GdmPayload),
    User(UserPayload),
    UserSettings(UserSettingsPayload),
    UserToDevice(UserToDevicePayload),
    UserDeviceKey(UserDeviceKeyPayload),
    Media(MediaPayload),
    Common(CommonPayload),
}

/// Borrowed view of an inception payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inception<'a> {
    Space(&'a SpaceInception),
    Channel(&'a ChannelInception),
    Dm(&'a DmInception),
    Gdm(&'a GdmInception),
    User(&'a UserInception),
    UserSettings(&'a UserInception),
    UserToDevice(&'a UserInception),
    UserDeviceKey(&'a UserInception),
    Media(&'a MediaInception),
}

impl<'a> Inception<'a> {
    /// Stream kind this inception creates
    pub fn kind(&self) -> StreamKind {
        match self {
            Inception::Space(_) => StreamKind::Space,
            Inception::Channel(_) => StreamKind::Channel,
            Inception::Dm(_) => StreamKind::Dm,
            Inception::Gdm(_) => StreamKind::Gdm,
            Inception::User(_) => StreamKind::User,
            Inception::UserSettings(_) => StreamKind::UserSettings,
            Inception::UserToDevice(_) => StreamKind::UserToDevice,
            Inception::UserDeviceKey(_) => StreamKind::UserDeviceKey,
            Inception::Media(_) => StreamKind::Media,
        }
    }

    /// Stream id named by the inception
    pub fn stream_id(&self) -> &'a StreamId {
        match *self {
            Inception::Space(i) => &i.stream_id,
            Inception::Channel(i) => &i.stream_id,
            Inception::Dm(i) => &i.stream_id,
            Inception::Gdm(i) => &i.stream_id,
            Inception::User(i)
            | Inception::UserSettings(i)
            | Inception::UserToDevice(i)
            | Inception::UserDeviceKey(i) => &i.stream_id,
            Inception::Media(i) => &i.stream_id,
        }
    }

    pub fn settings(&self) -> &'a StreamSettings {
        match *self {
            Inception::Space(i) => &i.settings,
            Inception::Channel(i) => &i.settings,
            Inception::Dm(i) => &i.settings,
            Inception::Gdm(i) => &i.settings,
            Inception::User(i)
            | Inception::UserSettings(i)
            | Inception::UserToDevice(i)
            | Inception::UserDeviceKey(i) => &i.settings,
            Inception::Media(i) => &i.settings,
        }
    }
}

impl Payload {
    /// Stream kind this payload belongs to; `None` for common and header payloads
    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            Payload::MiniblockHeader(_) | Payload::Common(_) => None,
            Payload::Space(_) => Some(StreamKind::Space),
            Payload::Channel(_) => Some(StreamKind::Channel),
            Payload::Dm(_) => Some(StreamKind::Dm),
            Payload::Gdm(_) => Some(StreamKind::Gdm),
            Payload::User(_) => Some(StreamKind::User),
            Payload::UserSettings(_) => Some(StreamKind::UserSettings),
            Payload::UserToDevice(_) => Some(StreamKind::UserToDevice),
            Payload::UserDeviceKey(_) => Some(StreamKind::UserDeviceKey),
            Payload::Media(_) => Some(StreamKind::Media),
        }
    }

    /// Inception body, if this payload is one
    pub fn inception(&self) -> Option<Inception<'_>> {
        match self {
            Payload::Space(SpacePayload::Inception(i)) => Some(Inception::Space(i)),
            Payload::Channel(ChannelPayload::Inception(i)) => Some(Inception::Channel(i)),
            Payload::Dm(DmPayload::Inception(i)) => Some(Inception::Dm(i)),
            Payload::Gdm(GdmPayload::Inception(i)) => Some(Inception::Gdm(i)),
            Payload::User(UserPayload::Inception(i)) => Some(Inception::User(i)),
            Payload::UserSettings(UserSettingsPayload::Inception(i)) => {
                Some(Inception::UserSettings(i))
            }
            Payload::UserToDevice(UserToDevicePayload::Inception(i)) => {
                Some(Inception::UserToDevice(i))
            }
            Payload::UserDeviceKey(UserDeviceKeyPayload::Inception(i)) => {
                Some(Inception::UserDeviceKey(i))
            }
            Payload::Media(MediaPayload::Inception(i)) => Some(Inception::Media(i)),
            _ => None,
        }
    }

    pub fn is_inception(&self) -> bool {
        self.inception().is_some()
    }

    pub fn miniblock_header(&self) -> Option<&MiniblockHeader> {
        match self {
            Payload::MiniblockHeader(header) => Some(header),
            _ => None,
        }
    }

    /// Membership body, for stream kinds that track membership
    pub fn membership(&self) -> Option<&Membership> {
        match self {
            Payload::Space(SpacePayload::Membership(m))
            | Payload::Channel(ChannelPayload::Membership(m))
            | Payload::Dm(DmPayload::Membership(m))
            | Payload::Gdm(GdmPayload::Membership(m)) => Some(m),
            _ => None,
        }
    }
}
