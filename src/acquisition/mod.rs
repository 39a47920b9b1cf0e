//! Acquisition pipeline: resolve → reserve → download → commit.
//!
//! Coordinates the resolver, downloader, cache, and catalog, and dedupes
//! concurrent requests for the same track into a single in-flight download.
//! Also hosts the operator surface: register, rename, remove, preload,
//! unload.

use crate::cache::{CacheError, CacheStore};
use crate::catalog::{CatalogError, TrackCatalog, TrackRecord};
use crate::downloader::{DownloadError, RateLimitedDownloader};
use crate::resolver::{LinkResolver, ResolveError};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("unknown track: {0}")]
    UnknownTrack(String),
    #[error("track {0} has no source link to resolve")]
    NoSourceLink(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    /// Per-download byte rate cap; zero disables throttling.
    pub download_speed: u64,
    /// A stored resolved link older than this is re-resolved before use.
    pub resolved_link_ttl_days: i64,
    /// Reservation size when the host reports no Content-Length.
    pub default_expected_bytes: u64,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            download_speed: 2 * 1024 * 1024,
            resolved_link_ttl_days: 5,
            default_expected_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Outcome of a bulk preload/unload over a playlist.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct MediaAcquirer {
    resolver: Arc<LinkResolver>,
    downloader: Arc<RateLimitedDownloader>,
    cache: Arc<CacheStore>,
    catalog: Arc<dyn TrackCatalog>,
    config: AcquirerConfig,
    /// Per-track single-flight guards; a second caller for the same track
    /// awaits the first download instead of starting its own.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MediaAcquirer {
    pub fn new(
        resolver: Arc<LinkResolver>,
        downloader: Arc<RateLimitedDownloader>,
        cache: Arc<CacheStore>,
        catalog: Arc<dyn TrackCatalog>,
        config: AcquirerConfig,
    ) -> Self {
        Self {
            resolver,
            downloader,
            cache,
            catalog,
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn catalog(&self) -> &Arc<dyn TrackCatalog> {
        &self.catalog
    }

    /// Make sure a track's media is on disk, downloading it if needed.
    /// Returns the cache path.
    pub async fn ensure_cached(&self, track_id: &str) -> Result<PathBuf, AcquireError> {
        let guard_handle = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(track_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let _guard = guard_handle.lock().await;
        let result = self.fetch_serialized(track_id).await;
        drop(_guard);

        // Drop the guard entry once nobody else is waiting on it.
        {
            let mut inflight = self.inflight.lock().await;
            if let Some(entry) = inflight.get(track_id) {
                if Arc::strong_count(entry) <= 2 {
                    inflight.remove(track_id);
                }
            }
        }

        result
    }

    /// The actual pipeline; runs under the per-track guard.
    async fn fetch_serialized(&self, track_id: &str) -> Result<PathBuf, AcquireError> {
        let track = self
            .catalog
            .get(track_id)?
            .ok_or_else(|| AcquireError::UnknownTrack(track_id.to_string()))?;

        // A prior caller may have finished the download while we waited.
        if self.cache.is_cached(track_id) {
            return Ok(self.cache.path_for(track_id));
        }

        let (direct_url, used_stored) = self.current_direct_url(&track).await?;

        let expected = self
            .downloader
            .content_length(&direct_url)
            .await
            .filter(|len| *len > 0)
            .unwrap_or(self.config.default_expected_bytes);
        self.cache.reserve_space(track_id, expected).await?;

        let destination = self.cache.path_for(track_id);
        let bytes = match self
            .downloader
            .download(&direct_url, &destination, self.config.download_speed)
            .await
        {
            Ok(bytes) => bytes,
            Err(first_err) => {
                // The stored resolution may have expired upstream; force one
                // re-resolution and retry before surfacing the failure.
                match self.retry_with_fresh_link(&track, used_stored).await {
                    Some(bytes) => bytes,
                    None => {
                        self.cache.release(track_id).await;
                        return Err(first_err.into());
                    }
                }
            }
        };

        let path = match self.cache.commit(track_id, bytes).await {
            Ok(path) => path,
            Err(err) => {
                self.cache.release(track_id).await;
                return Err(err.into());
            }
        };
        info!("Cached track {} ({} bytes) at {:?}", track_id, bytes, path);
        Ok(path)
    }

    async fn retry_with_fresh_link(&self, track: &TrackRecord, used_stored: bool) -> Option<u64> {
        if !used_stored {
            return None;
        }
        let source = track.source_link.as_deref()?;

        self.resolver.invalidate(source);
        let link = match self.resolver.resolve(source).await {
            Ok(link) => link,
            Err(err) => {
                warn!("Re-resolution of {} failed: {}", source, err);
                return None;
            }
        };
        if let Err(err) = self
            .catalog
            .set_resolved_link(&track.id, &link.url, link.service)
        {
            warn!("Failed to persist refreshed link for {}: {}", track.id, err);
        }

        let destination = self.cache.path_for(&track.id);
        match self
            .downloader
            .download(&link.url, &destination, self.config.download_speed)
            .await
        {
            Ok(bytes) => {
                info!("Retry with refreshed link succeeded for {}", track.id);
                Some(bytes)
            }
            Err(err) => {
                warn!("Retry with refreshed link failed for {}: {}", track.id, err);
                None
            }
        }
    }

    /// Stored resolved link if still fresh; otherwise resolve the source
    /// link and persist the result. Returns (url, came_from_storage).
    async fn current_direct_url(
        &self,
        track: &TrackRecord,
    ) -> Result<(String, bool), AcquireError> {
        if let (Some(url), Some(resolved_at)) = (&track.resolved_link, track.resolved_at) {
            let age = Utc::now() - resolved_at;
            if age < ChronoDuration::days(self.config.resolved_link_ttl_days) {
                return Ok((url.clone(), true));
            }
        }

        let source = track
            .source_link
            .as_deref()
            .ok_or_else(|| AcquireError::NoSourceLink(track.id.clone()))?;
        let link = self.resolver.resolve(source).await?;
        self.catalog
            .set_resolved_link(&track.id, &link.url, link.service)?;
        Ok((link.url, false))
    }

    // === Operator surface ===

    /// Register a new track and resolve+verify its link up front. The
    /// resolution result is stored; the media itself is not downloaded yet.
    pub async fn register_track(
        &self,
        title: &str,
        artist: &str,
        source_link: &str,
        genre: Option<&str>,
    ) -> Result<TrackRecord, AcquireError> {
        let mut track = TrackRecord::new(title, artist).with_source_link(source_link);
        track.genre = genre.map(String::from);

        let link = self.resolver.resolve(source_link).await?;
        track.resolved_link = Some(link.url);
        track.resolved_at = Some(link.resolved_at);
        track.service = link.service;

        self.catalog.upsert(&track)?;
        info!(
            "Registered track {} ({} - {}) via {}",
            track.id, track.artist, track.title, track.service
        );
        Ok(track)
    }

    /// Remove a track: evict any cached file, then delete the record
    /// (playlist entries cascade).
    pub async fn remove_track(&self, track_id: &str) -> Result<bool, AcquireError> {
        self.cache.evict(track_id).await?;
        Ok(self.catalog.delete(track_id)?)
    }

    /// Apply a metadata rename. When the identity (and so the id) changes,
    /// the cached file moves to the new id's path and playlist references
    /// are rewritten.
    pub async fn rename_track(
        &self,
        track_id: &str,
        new_title: &str,
        new_artist: &str,
    ) -> Result<TrackRecord, AcquireError> {
        let new_id = crate::catalog::derive_track_id(new_title, new_artist);
        let moved = if new_id != track_id {
            self.cache.relocate(track_id, &new_id).await?
        } else {
            None
        };
        Ok(self
            .catalog
            .rename_track(track_id, new_title, new_artist, moved.as_deref())?)
    }

    /// Force-cache a single track (operator preload).
    pub async fn preload(&self, track_id: &str) -> Result<PathBuf, AcquireError> {
        self.ensure_cached(track_id).await
    }

    /// Force-cache every track in a playlist. Per-track failures are logged
    /// and counted, never fatal to the rest of the batch.
    pub async fn preload_playlist(&self, playlist_id: &str) -> Result<BulkOutcome, AcquireError> {
        let tracks = self.catalog.playlist_tracks(playlist_id)?;
        let mut outcome = BulkOutcome::default();
        for track in tracks {
            match self.ensure_cached(&track.id).await {
                Ok(_) => outcome.succeeded += 1,
                Err(err) => {
                    warn!("Preload of {} failed: {}", track.id, err);
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Force-evict a track, bypassing score ordering. Operator intent wins.
    pub async fn unload(&self, track_id: &str) -> Result<bool, AcquireError> {
        Ok(self.cache.evict(track_id).await?)
    }

    /// Force-evict every track in a playlist.
    pub async fn unload_playlist(&self, playlist_id: &str) -> Result<BulkOutcome, AcquireError> {
        let tracks = self.catalog.playlist_tracks(playlist_id)?;
        let mut outcome = BulkOutcome::default();
        for track in tracks {
            match self.cache.evict(&track.id).await {
                Ok(_) => outcome.succeeded += 1,
                Err(err) => {
                    warn!("Unload of {} failed: {}", track.id, err);
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}
