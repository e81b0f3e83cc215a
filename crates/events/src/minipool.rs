//! Pending events waiting to be sealed into the next miniblock

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::event::ParsedEvent;
use crate::hash::EventHash;

/// Ordered, de-duplicated pending events tagged with the block number that
/// will seal them.
///
/// Copying is shallow: events are shared behind `Arc`.
#[derive(Debug, Clone)]
pub struct Minipool {
    generation: u64,
    instance_id: Uuid,
    events: Vec<Arc<ParsedEvent>>,
    index: HashMap<EventHash, usize>,
}

impl Minipool {
    /// Fresh minipool with a newly minted instance id
    pub fn new(generation: u64, events: Vec<Arc<ParsedEvent>>) -> Self {
        Self::with_instance(generation, Uuid::new_v4(), events)
    }

    /// Minipool continuing an existing in-memory lineage
    pub fn with_instance(
        generation: u64,
        instance_id: Uuid,
        events: Vec<Arc<ParsedEvent>>,
    ) -> Self {
        let mut pool = Self {
            generation,
            instance_id,
            events: Vec::with_capacity(events.len()),
            index: HashMap::with_capacity(events.len()),
        };
        for event in events {
            pool.push(event);
        }
        pool
    }

    fn push(&mut self, event: Arc<ParsedEvent>) {
        if self.index.contains_key(&event.hash) {
            return;
        }
        self.index.insert(event.hash, self.events.len());
        self.events.push(event);
    }

    /// Copy of this minipool with one more event
    pub fn copy_and_add(&self, event: Arc<ParsedEvent>) -> Self {
        let mut next = self.clone();
        next.push(event);
        next
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Arc<ParsedEvent>] {
        &self.events
    }

    pub fn get(&self, hash: &EventHash) -> Option<&Arc<ParsedEvent>> {
        self.index.get(hash).map(|i| &self.events[*i])
    }

    pub fn contains(&self, hash: &EventHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Events at or after `slot`
    pub fn events_from_slot(&self, slot: usize) -> &[Arc<ParsedEvent>] {
        self.events.get(slot..).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::event::make_parsed_event;
    use crate::payload::{ChannelPayload, EncryptedData, Payload};
    use crate::wallet::Wallet;

    fn event(wallet: &Wallet) -> Arc<ParsedEvent> {
        make_parsed_event(
            wallet,
            Payload::Channel(ChannelPayload::Message(EncryptedData {
                ciphertext: Bytes::from_static(b"m"),
                algorithm: "none".to_string(),
            })),
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn copy_and_add_leaves_original_untouched() {
        let wallet = Wallet::generate();
        let pool = Minipool::new(3, vec![event(&wallet)]);
        let added = event(&wallet);
        let next = pool.copy_and_add(added.clone());
        assert_eq!(pool.len(), 1);
        assert_eq!(next.len(), 2);
        assert_eq!(next.generation(), 3);
        assert_eq!(next.instance_id(), pool.instance_id());
        assert!(next.contains(&added.hash));
        assert_eq!(next.events_from_slot(1)[0].hash, added.hash);
        assert!(next.events_from_slot(5).is_empty());
    }

    #[test]
    fn duplicates_are_ignored() {
        let wallet = Wallet::generate();
        let e = event(&wallet);
        let pool = Minipool::new(0, vec![e.clone(), e.clone()]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.copy_and_add(e).len(), 1);
    }

    #[test]
    fn new_pools_get_fresh_instances() {
        assert_ne!(
            Minipool::new(0, vec![]).instance_id(),
            Minipool::new(0, vec![]).instance_id()
        );
    }
}
