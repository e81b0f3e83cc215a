//! Periodic miniblock production and cache cleanup

use std::sync::Arc;

use relay_events::RelayResult;
use relay_storage::StreamStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::StreamCache;
use crate::stream::Stream;

/// Seals the minipools of cached streams on a fixed tick and unloads idle
/// streams on another
pub struct MiniblockProducer<S>
where
    S: StreamStore,
{
    cache: Arc<StreamCache<S>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<S> MiniblockProducer<S>
where
    S: StreamStore,
{
    pub fn new(cache: Arc<StreamCache<S>>) -> Self {
        Self {
            cache,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// One pass over the cache. Returns how many miniblocks were sealed.
    ///
    /// Only loaded streams are considered; streams whose inception disables
    /// miniblock creation and streams with an empty minipool are skipped.
    pub async fn produce_all(&self) -> usize {
        let mut sealed = 0;
        for stream in self.cache.streams() {
            match produce_one(&stream).await {
                Ok(Some(num)) => {
                    debug!("Produced miniblock {} for {}", num, stream.stream_id());
                    sealed += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "Failed to produce miniblock for {}: {}",
                        stream.stream_id(),
                        err
                    );
                }
            }
        }
        sealed
    }

    /// Spawn the production and cleanup loops
    pub fn start(&self) {
        let config = self.cache.config().clone();
        info!(
            "Starting miniblock producer (interval {:?}, cleanup every {:?})",
            config.miniblock_interval, config.cache_cleanup_interval
        );

        let producer = Self {
            cache: Arc::clone(&self.cache),
            shutdown_token: self.shutdown_token.clone(),
            task_tracker: self.task_tracker.clone(),
        };
        let shutdown_token = self.shutdown_token.clone();
        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(config.miniblock_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        producer.produce_all().await;
                    }
                }
            }
        });

        let cache = Arc::clone(&self.cache);
        let shutdown_token = self.shutdown_token.clone();
        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(config.cache_cleanup_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        cache.cache_cleanup(config.cache_expiration).await;
                    }
                }
            }
        });
    }

    /// Stop both loops and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("Miniblock producer stopped");
    }
}

async fn produce_one<S>(stream: &Stream<S>) -> RelayResult<Option<u64>>
where
    S: StreamStore,
{
    let Some(view) = stream.try_get_view().await else {
        return Ok(None);
    };
    if view.minipool().is_empty() || view.settings().disable_miniblock_creation {
        return Ok(None);
    }
    stream.make_miniblock(false).await
}
