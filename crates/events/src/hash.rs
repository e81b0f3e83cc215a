//! Content hashes identifying events and miniblock headers

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, RelayResult};

/// SHA-256 content hash of an event's encoded bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventHash([u8; 32]);

impl EventHash {
    /// All-zero hash, used where a position has no sealed block yet
    pub const ZERO: EventHash = EventHash([0u8; 32]);

    /// Hash arbitrary bytes
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Wrap raw hash bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form produced by [`EventHash::to_hex`]
    pub fn from_hex(s: &str) -> RelayResult<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::bad_event(format!("bad hash hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::bad_event("hash must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHash({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parses_back() {
        let hash = EventHash::digest(b"hello");
        assert_eq!(EventHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(hash.short().len(), 8);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(EventHash::from_hex("abcd").is_err());
        assert!(EventHash::from_hex("zz").is_err());
    }
}
