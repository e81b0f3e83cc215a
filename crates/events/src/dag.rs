//! Event DAG helpers: causal ordering and head tracking

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{Error, RelayResult};
use crate::event::ParsedEvent;
use crate::hash::EventHash;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Order events so every event follows all of its predecessors.
///
/// Depth-first: unvisited predecessors are emitted before the event that
/// names them, otherwise input order is kept. Fails on duplicate hashes,
/// references to events outside the set, and cycles.
pub fn topological_sort(events: &[Arc<ParsedEvent>]) -> RelayResult<Vec<Arc<ParsedEvent>>> {
    let mut index: HashMap<EventHash, usize> = HashMap::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        if index.insert(event.hash, i).is_some() {
            return Err(Error::bad_event(format!("duplicate event {}", event.hash)));
        }
    }

    let mut preds: Vec<Vec<usize>> = Vec::with_capacity(events.len());
    for event in events {
        let mut list = Vec::with_capacity(event.prev_event_hashes().len());
        for prev in event.prev_event_hashes() {
            let Some(&p) = index.get(prev) else {
                return Err(Error::bad_event(format!(
                    "event {} references missing predecessor {}",
                    event.hash, prev
                )));
            };
            list.push(p);
        }
        preds.push(list);
    }

    let mut marks = vec![Mark::Unvisited; events.len()];
    let mut order = Vec::with_capacity(events.len());
    for root in 0..events.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::InProgress;
        let mut stack = vec![(root, 0usize)];
        while let Some(&(node, next)) = stack.last() {
            if let Some(&p) = preds[node].get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks[p] {
                    Mark::Unvisited => {
                        marks[p] = Mark::InProgress;
                        stack.push((p, 0));
                    }
                    Mark::InProgress => {
                        return Err(Error::bad_event(format!(
                            "cycle through event {}",
                            events[p].hash
                        )));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                order.push(Arc::clone(&events[node]));
                stack.pop();
            }
        }
    }
    Ok(order)
}

/// Heads of `base` extended by `events`: every base hash and event hash that
/// no event in `events` names as a predecessor. Header events are ignored.
pub fn frontier<'a>(
    base: &[EventHash],
    events: impl IntoIterator<Item = &'a ParsedEvent>,
) -> Vec<EventHash> {
    let mut leaves: BTreeSet<EventHash> = base.iter().copied().collect();
    for event in events {
        if event.is_miniblock_header() {
            continue;
        }
        for prev in event.prev_event_hashes() {
            leaves.remove(prev);
        }
        leaves.insert(event.hash);
    }
    leaves.into_iter().collect()
}
