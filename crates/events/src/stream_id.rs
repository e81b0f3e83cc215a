//! Stream identifiers and stream kinds

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, RelayResult};

/// The kind of a stream, encoded as the two character prefix of its id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    Space,
    Channel,
    Dm,
    Gdm,
    User,
    UserSettings,
    UserToDevice,
    UserDeviceKey,
    Media,
}

impl StreamKind {
    /// All stream kinds
    pub const ALL: [StreamKind; 9] = [
        StreamKind::Space,
        StreamKind::Channel,
        StreamKind::Dm,
        StreamKind::Gdm,
        StreamKind::User,
        StreamKind::UserSettings,
        StreamKind::UserToDevice,
        StreamKind::UserDeviceKey,
        StreamKind::Media,
    ];

    /// Id prefix for this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            StreamKind::Space => "10",
            StreamKind::Channel => "20",
            StreamKind::Dm => "88",
            StreamKind::Gdm => "77",
            StreamKind::User => "a8",
            StreamKind::UserSettings => "a5",
            StreamKind::UserToDevice => "a1",
            StreamKind::UserDeviceKey => "ad",
            StreamKind::Media => "ff",
        }
    }

    /// Look up a kind by id prefix, case-insensitively
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        let prefix = prefix.to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// Streams owned by a single user carry the user id as their suffix
    pub fn is_user_owned(&self) -> bool {
        matches!(
            self,
            StreamKind::User
                | StreamKind::UserSettings
                | StreamKind::UserToDevice
                | StreamKind::UserDeviceKey
        )
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Space => "space",
            StreamKind::Channel => "channel",
            StreamKind::Dm => "dm",
            StreamKind::Gdm => "gdm",
            StreamKind::User => "user",
            StreamKind::UserSettings => "user-settings",
            StreamKind::UserToDevice => "user-to-device",
            StreamKind::UserDeviceKey => "user-device-key",
            StreamKind::Media => "media",
        };
        write!(f, "{name}")
    }
}

/// Validated stream id of the form `<prefix>-<suffix>`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId {
    id: String,
    kind: StreamKind,
}

impl StreamId {
    /// Parse and validate a stream id
    pub fn new(id: impl Into<String>) -> RelayResult<Self> {
        let id = id.into();
        let Some((prefix, suffix)) = id.split_once('-') else {
            return Err(Error::bad_stream_id(format!("missing kind prefix: {id:?}")));
        };
        let kind = StreamKind::from_prefix(prefix)
            .ok_or_else(|| Error::bad_stream_id(format!("unknown kind prefix: {id:?}")))?;
        if suffix.is_empty() {
            return Err(Error::bad_stream_id(format!("empty suffix: {id:?}")));
        }
        if id.chars().any(char::is_control) {
            return Err(Error::bad_stream_id("control characters in stream id"));
        }
        Ok(Self { id, kind })
    }

    /// Build an id from a kind and suffix
    pub fn from_parts(kind: StreamKind, suffix: &str) -> RelayResult<Self> {
        Self::new(format!("{}-{}", kind.prefix(), suffix))
    }

    /// Id of a user-owned stream of the given kind
    pub fn for_user(kind: StreamKind, user_id: &str) -> RelayResult<Self> {
        if !kind.is_user_owned() {
            return Err(Error::bad_stream_id(format!("{kind} streams are not user owned")));
        }
        Self::from_parts(kind, user_id)
    }

    /// Kind encoded in the prefix
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Everything after the first `-`
    pub fn suffix(&self) -> &str {
        self.id
            .split_once('-')
            .map(|(_, suffix)| suffix)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.id)
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StreamId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamId> for String {
    fn from(value: StreamId) -> Self {
        value.id
    }
}
