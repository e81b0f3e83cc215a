//! Snapshot and retention policy for stream views

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::stream_id::StreamKind;

/// Default number of events between snapshots
pub const DEFAULT_MIN_EVENTS_PER_SNAPSHOT: usize = 100;

/// Per-stream policy used when proposing and applying miniblocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Events since the last snapshot that trigger a new one
    pub default_min_events_per_snapshot: usize,
    /// Overrides keyed by stream kind name (`space`, `media`, ...) or id prefix
    pub min_events_per_snapshot: HashMap<String, usize>,
    /// Blocks kept in memory before the latest snapshot block
    pub recency_generations: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_min_events_per_snapshot: DEFAULT_MIN_EVENTS_PER_SNAPSHOT,
            min_events_per_snapshot: HashMap::new(),
            recency_generations: 5,
        }
    }
}

impl StreamConfig {
    /// Snapshot threshold for a stream kind
    pub fn min_events_per_snapshot(&self, kind: StreamKind) -> usize {
        let by_name = self.min_events_per_snapshot.get(&kind.to_string());
        if let Some(value) = by_name.or_else(|| self.min_events_per_snapshot.get(kind.prefix())) {
            return *value;
        }
        if self.default_min_events_per_snapshot != 0 {
            return self.default_min_events_per_snapshot;
        }
        DEFAULT_MIN_EVENTS_PER_SNAPSHOT
    }
}
