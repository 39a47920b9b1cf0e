//! Cache budget enforcement job.
//!
//! Periodically evicts lowest-scored tracks when usage has crept past the
//! high-water mark (downloads committed between reservations, files grown,
//! budget lowered across a restart).

use crate::cache::CacheStore;
use crate::maintenance::MaintenanceJob;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct CacheCleanupJob {
    cache: Arc<CacheStore>,
    interval: Duration,
}

impl CacheCleanupJob {
    pub fn new(cache: Arc<CacheStore>, interval: Duration) -> Self {
        Self { cache, interval }
    }
}

#[async_trait]
impl MaintenanceJob for CacheCleanupJob {
    fn id(&self) -> &'static str {
        "cache_cleanup"
    }

    fn description(&self) -> &'static str {
        "Evict lowest-scored tracks when cache usage passes the high-water mark"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String> {
        let summary = self.cache.enforce_budget().await?;
        if summary.evicted == 0 {
            Ok(format!(
                "usage {} bytes within budget, nothing evicted",
                self.cache.usage().await
            ))
        } else {
            Ok(format!(
                "evicted {} tracks, freed {} bytes, usage now {} bytes",
                summary.evicted,
                summary.bytes_freed,
                self.cache.usage().await
            ))
        }
    }
}
