//! Bounded on-disk media cache.
//!
//! Files live under a cache root at hash-sharded paths; a byte budget with
//! high/low water marks drives scoring-based eviction. Usage is accounted
//! incrementally from a one-time startup scan so the hot path never walks
//! the directory tree.

pub mod scoring;

use crate::catalog::{CatalogError, TrackCatalog};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Usage fraction that triggers eviction.
const HIGH_WATER_FRACTION: f64 = 0.8;
/// Usage fraction eviction drives down to.
const LOW_WATER_FRACTION: f64 = 0.7;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache full: {needed} bytes requested against a {budget} byte budget")]
    Full { needed: u64, budget: u64 },
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result of a budget-enforcement pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionSummary {
    pub evicted: usize,
    pub bytes_freed: u64,
}

struct CacheState {
    /// Bytes of committed files on disk under the root.
    used_bytes: u64,
    /// In-flight reservations: track id -> expected bytes. Counted against
    /// the budget so concurrent reservations cannot both claim the same
    /// headroom.
    reserved: HashMap<String, u64>,
    /// Tracks exempt from eviction (e.g. currently playing).
    pinned: HashSet<String>,
}

impl CacheState {
    fn committed_plus_reserved(&self) -> u64 {
        self.used_bytes + self.reserved.values().sum::<u64>()
    }
}

pub struct CacheStore {
    root: PathBuf,
    max_size: u64,
    high_water: u64,
    low_water: u64,
    catalog: Arc<dyn TrackCatalog>,
    state: Mutex<CacheState>,
}

impl CacheStore {
    /// Open the cache rooted at `root`, creating the directory if absent and
    /// scanning it once to seed the usage counter.
    pub fn open(
        root: impl Into<PathBuf>,
        max_size: u64,
        catalog: Arc<dyn TrackCatalog>,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let used_bytes = scan_usage(&root);
        info!(
            "Cache opened at {:?}: {} bytes used of {} budget",
            root, used_bytes, max_size
        );

        Ok(Self {
            root,
            max_size,
            high_water: (max_size as f64 * HIGH_WATER_FRACTION) as u64,
            low_water: (max_size as f64 * LOW_WATER_FRACTION) as u64,
            catalog,
            state: Mutex::new(CacheState {
                used_bytes,
                reserved: HashMap::new(),
                pinned: HashSet::new(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Deterministic on-disk location for a track: SHA-256 of the id, two-char
    /// shard directory, full digest as the file name. No directory listing
    /// needed to find a track.
    pub fn path_for(&self, track_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(track_id.as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.root.join(&digest[..2]).join(digest)
    }

    /// Filesystem-only check; does not consult the catalog.
    pub fn is_cached(&self, track_id: &str) -> bool {
        std::fs::metadata(self.path_for(track_id))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Committed bytes currently on disk.
    pub async fn usage(&self) -> u64 {
        self.state.lock().await.used_bytes
    }

    /// Exempt a track from eviction until unpinned.
    pub async fn pin(&self, track_id: &str) {
        self.state.lock().await.pinned.insert(track_id.to_string());
    }

    pub async fn unpin(&self, track_id: &str) {
        self.state.lock().await.pinned.remove(track_id);
    }

    /// Reserve headroom for an incoming download of `expected_bytes`.
    ///
    /// Past the high-water mark this evicts lowest-scored tracks until the
    /// reservation fits under the low-water mark. Fails with
    /// [`CacheError::Full`] only when eviction cannot free enough to fit the
    /// file inside the budget at all (e.g. a single file larger than the
    /// whole cache).
    pub async fn reserve_space(
        &self,
        track_id: &str,
        expected_bytes: u64,
    ) -> Result<(), CacheError> {
        if expected_bytes > self.max_size {
            return Err(CacheError::Full {
                needed: expected_bytes,
                budget: self.max_size,
            });
        }

        let mut state = self.state.lock().await;

        if state.committed_plus_reserved() + expected_bytes > self.high_water {
            let target = self.low_water.saturating_sub(
                expected_bytes + state.reserved.values().sum::<u64>(),
            );
            let summary = self.evict_down_to(&mut state, target)?;
            if summary.evicted > 0 {
                info!(
                    "Reservation for {} evicted {} tracks, freed {} bytes",
                    track_id, summary.evicted, summary.bytes_freed
                );
            }
        }

        if state.committed_plus_reserved() + expected_bytes > self.max_size {
            return Err(CacheError::Full {
                needed: expected_bytes,
                budget: self.max_size,
            });
        }

        state.reserved.insert(track_id.to_string(), expected_bytes);
        Ok(())
    }

    /// Drop a reservation without committing (download failed or was
    /// abandoned). No-op when nothing was reserved.
    pub async fn release(&self, track_id: &str) {
        self.state.lock().await.reserved.remove(track_id);
    }

    /// Record a completed download: fold the file into the usage counter and
    /// flip the catalog's cached-state fields. Returns the cache path.
    pub async fn commit(&self, track_id: &str, bytes_written: u64) -> Result<PathBuf, CacheError> {
        let path = self.path_for(track_id);
        let on_disk = std::fs::metadata(&path)?.len();
        if on_disk != bytes_written {
            warn!(
                "Commit size mismatch for {}: wrote {} bytes, file has {}",
                track_id, bytes_written, on_disk
            );
        }

        let mut state = self.state.lock().await;
        state.reserved.remove(track_id);
        state.used_bytes += on_disk;
        self.catalog.set_cached(track_id, &path, on_disk)?;
        Ok(path)
    }

    /// Delete a cached file and clear the track's cached state in the same
    /// logical operation. Idempotent: evicting an absent entry is a no-op
    /// success. Returns true when a file was actually removed.
    pub async fn evict(&self, track_id: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        self.evict_locked(&mut state, track_id)
    }

    /// Evict lowest-scored tracks until usage is at or below the low-water
    /// mark, if usage is above the high-water mark. Used by the maintenance
    /// loop; pinned tracks are never candidates.
    pub async fn enforce_budget(&self) -> Result<EvictionSummary, CacheError> {
        let mut state = self.state.lock().await;
        if state.used_bytes <= self.high_water {
            return Ok(EvictionSummary::default());
        }
        let low_water = self.low_water;
        self.evict_down_to(&mut state, low_water)
    }

    /// Move a cached file to the location of a new id (metadata rename).
    /// Usage is unchanged. Returns the new path, or None when nothing was
    /// cached under the old id.
    pub async fn relocate(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> Result<Option<PathBuf>, CacheError> {
        let _state = self.state.lock().await;
        let old_path = self.path_for(old_id);
        if !old_path.exists() {
            return Ok(None);
        }
        let new_path = self.path_for(new_id);
        if let Some(parent) = new_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&old_path, &new_path)?;
        Ok(Some(new_path))
    }

    fn evict_locked(
        &self,
        state: &mut CacheState,
        track_id: &str,
    ) -> Result<bool, CacheError> {
        let path = self.path_for(track_id);
        let removed = match std::fs::metadata(&path) {
            Ok(meta) => {
                let size = meta.len();
                std::fs::remove_file(&path)?;
                state.used_bytes = state.used_bytes.saturating_sub(size);
                debug!("Evicted {} ({} bytes)", track_id, size);
                true
            }
            Err(_) => false,
        };
        // Clear the flag even when the file was already gone so a broken
        // record cannot keep claiming to be cached.
        self.catalog.clear_cached(track_id)?;
        Ok(removed)
    }

    /// Evict ascending-score candidates until `used_bytes <= target` or the
    /// candidate list runs dry.
    fn evict_down_to(
        &self,
        state: &mut CacheState,
        target: u64,
    ) -> Result<EvictionSummary, CacheError> {
        let mut candidates = self.catalog.list_cached()?;
        candidates.retain(|t| !state.pinned.contains(&t.id));
        scoring::sort_eviction_candidates(&mut candidates, Utc::now());

        let mut summary = EvictionSummary::default();
        for candidate in candidates {
            if state.used_bytes <= target {
                break;
            }
            let before = state.used_bytes;
            // A candidate vanishing mid-run (deleted by an operator) is fine;
            // evict_locked treats it as already gone.
            if self.evict_locked(state, &candidate.id)? {
                summary.evicted += 1;
                summary.bytes_freed += before - state.used_bytes;
            }
        }
        Ok(summary)
    }
}

/// One-time startup scan: sum of file sizes under the cache root.
fn scan_usage(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
