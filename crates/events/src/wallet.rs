//! Node and user signing identities

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, RelayResult};
use crate::hash::EventHash;

/// Public identity of an event creator or a node: the ed25519 verifying key bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// User id form of this address, used as map keys in snapshots
    pub fn to_user_id(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a user id produced by [`Address::to_user_id`]
    pub fn from_user_id(s: &str) -> RelayResult<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::bad_event(format!("bad address: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::bad_event("address must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Check a signature over a content hash
    pub fn verify(&self, hash: &EventHash, signature: &[u8]) -> RelayResult<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| Error::bad_event(format!("bad creator key: {e}")))?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| Error::bad_event(format!("bad signature encoding: {e}")))?;
        key.verify(hash.as_bytes(), &signature)
            .map_err(|e| Error::bad_event(format!("signature mismatch: {e}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..4]))
    }
}

/// Signing key for events and miniblock headers
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
}

impl Wallet {
    /// Generate a fresh random wallet
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Use an existing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Address of this wallet
    pub fn address(&self) -> Address {
        Address(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a content hash
    pub fn sign_hash(&self, hash: &EventHash) -> Vec<u8> {
        self.signing_key.sign(hash.as_bytes()).to_bytes().to_vec()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish()
    }
}
