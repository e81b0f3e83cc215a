//! Signed envelopes and the events decoded from them

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, RelayResult};
use crate::hash::EventHash;
use crate::payload::Payload;
use crate::wallet::{Address, Wallet};

/// Signed wire container for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Canonical CBOR encoding of an [`Event`]
    pub event_bytes: Bytes,
    /// SHA-256 of `event_bytes`
    pub hash: EventHash,
    /// Creator's signature over `hash`
    pub signature: Bytes,
}

impl Envelope {
    /// Storage encoding of the whole envelope
    pub fn to_bytes(&self) -> RelayResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    pub fn from_bytes(bytes: &[u8]) -> RelayResult<Self> {
        Ok(ciborium::from_reader(bytes)?)
    }
}

/// Logical event decoded from an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub creator_address: Address,
    pub salt: Bytes,
    pub prev_event_hashes: Vec<EventHash>,
    pub payload: Payload,
}

impl Event {
    pub fn encode(&self) -> RelayResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// An envelope together with its decoded event
#[derive(Clone, PartialEq)]
pub struct ParsedEvent {
    pub event: Event,
    pub envelope: Envelope,
    pub hash: EventHash,
    pub hash_str: String,
}

impl ParsedEvent {
    /// Recompute the content hash and check the creator's signature
    pub fn verify(&self) -> RelayResult<()> {
        let computed = EventHash::digest(&self.envelope.event_bytes);
        if computed != self.hash {
            return Err(Error::bad_event(format!(
                "hash mismatch: envelope says {}, content hashes to {}",
                self.hash, computed
            )));
        }
        self.event
            .creator_address
            .verify(&self.hash, &self.envelope.signature)
    }

    pub fn payload(&self) -> &Payload {
        &self.event.payload
    }

    pub fn prev_event_hashes(&self) -> &[EventHash] {
        &self.event.prev_event_hashes
    }

    pub fn is_miniblock_header(&self) -> bool {
        self.event.payload.miniblock_header().is_some()
    }

    /// Creator address in user id form
    pub fn creator_user_id(&self) -> String {
        self.event.creator_address.to_user_id()
    }
}

impl fmt::Debug for ParsedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedEvent")
            .field("hash", &self.hash)
            .field("creator", &self.event.creator_address)
            .field("prev", &self.event.prev_event_hashes)
            .finish()
    }
}

/// Decode an envelope.
///
/// Hash and signature are taken from the envelope as-is; callers that need
/// authenticity call [`ParsedEvent::verify`].
pub fn parse(envelope: &Envelope) -> RelayResult<ParsedEvent> {
    let event: Event = ciborium::from_reader(&envelope.event_bytes[..])?;
    Ok(ParsedEvent {
        event,
        envelope: envelope.clone(),
        hash: envelope.hash,
        hash_str: envelope.hash.to_hex(),
    })
}

/// Decode many envelopes in order, failing if any one fails
pub fn parse_many(envelopes: &[Envelope]) -> RelayResult<Vec<Arc<ParsedEvent>>> {
    envelopes
        .iter()
        .map(|e| parse(e).map(Arc::new))
        .collect()
}

/// Build and sign an envelope for a new event
pub fn make_envelope(
    wallet: &Wallet,
    payload: Payload,
    prev_event_hashes: Vec<EventHash>,
) -> RelayResult<Envelope> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let event = Event {
        creator_address: wallet.address(),
        salt: Bytes::copy_from_slice(&salt),
        prev_event_hashes,
        payload,
    };
    let event_bytes = event.encode()?;
    let hash = EventHash::digest(&event_bytes);
    let signature = Bytes::from(wallet.sign_hash(&hash));
    Ok(Envelope {
        event_bytes,
        hash,
        signature,
    })
}

/// Build, sign and parse an event in one step
pub fn make_parsed_event(
    wallet: &Wallet,
    payload: Payload,
    prev_event_hashes: Vec<EventHash>,
) -> RelayResult<Arc<ParsedEvent>> {
    let envelope = make_envelope(wallet, payload, prev_event_hashes)?;
    parse(&envelope).map(Arc::new)
}
