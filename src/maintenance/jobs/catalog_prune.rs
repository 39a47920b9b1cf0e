//! Catalog pruning job.
//!
//! Bounds catalog growth by deleting uncached tracks that have not been
//! played inside the retention window. Cached tracks are never pruned here,
//! whatever their age; the cache cleanup job owns those.

use crate::catalog::TrackCatalog;
use crate::maintenance::MaintenanceJob;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct CatalogPruneJob {
    catalog: Arc<dyn TrackCatalog>,
    interval: Duration,
    retention_days: u32,
}

impl CatalogPruneJob {
    pub fn new(catalog: Arc<dyn TrackCatalog>, interval: Duration, retention_days: u32) -> Self {
        Self {
            catalog,
            interval,
            retention_days,
        }
    }
}

#[async_trait]
impl MaintenanceJob for CatalogPruneJob {
    fn id(&self) -> &'static str {
        "catalog_prune"
    }

    fn description(&self) -> &'static str {
        "Delete uncached tracks not played within the retention window"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String> {
        let pruned = self.catalog.prune_stale(self.retention_days)?;
        Ok(format!(
            "pruned {} stale tracks (retention {} days)",
            pruned, self.retention_days
        ))
    }
}
