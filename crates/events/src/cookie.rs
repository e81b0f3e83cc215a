//! Sync cookies: resumption points handed to subscribers
//!
//! Wire text is
//! `<miniblock_num>/<minipool_slot>/<minipool_instance_id>/<miniblock_hash_hex>/<stream_id>`.
//! The stream id is last and absorbs any further `/`. The node address is not
//! part of the text; it travels alongside it.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, RelayResult};
use crate::hash::EventHash;
use crate::stream_id::StreamId;
use crate::wallet::Address;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCookie {
    /// Node that issued the cookie
    pub node_address: Address,
    pub stream_id: StreamId,
    /// Generation of the minipool the slot refers to
    pub miniblock_num: u64,
    pub minipool_instance_id: Uuid,
    /// Number of minipool events the holder has already seen
    pub minipool_slot: u64,
    /// Header hash of the last sealed block, zero for an unsealed stream
    pub prev_miniblock_hash: EventHash,
}

impl SyncCookie {
    /// Wire text, without the node address
    pub fn format(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.miniblock_num,
            self.minipool_slot,
            self.minipool_instance_id,
            self.prev_miniblock_hash.to_hex(),
            self.stream_id
        )
    }

    /// Rebuild a cookie issued by `node_address` from its wire text
    pub fn parse(node_address: Address, text: &str) -> RelayResult<Self> {
        let parts: Vec<&str> = text.splitn(5, '/').collect();
        if parts.len() < 5 {
            return Err(Error::bad_sync_cookie(format!(
                "expected 5 fields, got {}",
                parts.len()
            )));
        }
        if let Some(i) = parts[..4].iter().position(|p| p.is_empty()) {
            return Err(Error::bad_sync_cookie(format!("field {} is empty", i + 1)));
        }
        let miniblock_num = parts[0]
            .parse::<u64>()
            .map_err(|e| Error::bad_sync_cookie(format!("bad miniblock number: {e}")))?;
        let minipool_slot = parts[1]
            .parse::<u64>()
            .map_err(|e| Error::bad_sync_cookie(format!("bad minipool slot: {e}")))?;
        let minipool_instance_id = Uuid::parse_str(parts[2])
            .map_err(|e| Error::bad_sync_cookie(format!("bad minipool instance: {e}")))?;
        let prev_miniblock_hash = EventHash::from_hex(parts[3])
            .map_err(|e| Error::bad_sync_cookie(format!("bad miniblock hash: {}", e.message())))?;
        let stream_id = StreamId::new(parts[4])
            .map_err(|e| Error::bad_sync_cookie(format!("bad stream id: {}", e.message())))?;
        Ok(Self {
            node_address,
            stream_id,
            miniblock_num,
            minipool_instance_id,
            minipool_slot,
            prev_miniblock_hash,
        })
    }
}

impl fmt::Display for SyncCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.format(), self.node_address)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ErrorKind;
    use crate::wallet::Wallet;

    fn cookie(stream_id: &str) -> SyncCookie {
        SyncCookie {
            node_address: Wallet::generate().address(),
            stream_id: StreamId::new(stream_id).unwrap(),
            miniblock_num: 12,
            minipool_instance_id: Uuid::new_v4(),
            minipool_slot: 3,
            prev_miniblock_hash: EventHash::digest(b"block"),
        }
    }

    #[test]
    fn stream_id_absorbs_slashes() {
        let original = cookie("20-a/b/c");
        let parsed = SyncCookie::parse(original.node_address, &original.format()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.stream_id.as_str(), "20-a/b/c");
    }

    #[test]
    fn rejects_short_or_non_numeric_text() {
        let node = Wallet::generate().address();
        let text = cookie("20-x").format();
        let fields: Vec<&str> = text.splitn(5, '/').collect();

        let four = fields[..4].join("/");
        let err = SyncCookie::parse(node, &four).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSyncCookie);

        let bad_num = format!("x/{}", fields[1..].join("/"));
        assert!(SyncCookie::parse(node, &bad_num).is_err());

        let bad_slot = format!("{}/-1/{}", fields[0], fields[2..].join("/"));
        assert!(SyncCookie::parse(node, &bad_slot).is_err());

        let empty_instance = format!("{}/{}//{}", fields[0], fields[1], fields[3..].join("/"));
        assert!(SyncCookie::parse(node, &empty_instance).is_err());
    }

    proptest! {
        #[test]
        fn format_then_parse_is_identity(
            miniblock_num in any::<u64>(),
            minipool_slot in any::<u64>(),
            instance in any::<u128>(),
            hash in any::<[u8; 32]>(),
            suffix in "[a-zA-Z0-9/_.-]{1,40}",
        ) {
            let original = SyncCookie {
                node_address: Address::from_bytes([7u8; 32]),
                stream_id: StreamId::new(format!("88-{suffix}")).unwrap(),
                miniblock_num,
                minipool_instance_id: Uuid::from_u128(instance),
                minipool_slot,
                prev_miniblock_hash: EventHash::from_bytes(hash),
            };
            let parsed = SyncCookie::parse(original.node_address, &original.format()).unwrap();
            prop_assert_eq!(parsed, original);
        }
    }
}
