//! Durable track catalog: identities, links, counters, cache state, playlists.

mod models;
mod schema;
mod search;
mod sqlite_catalog;

pub use models::{derive_track_id, Playlist, PlaylistEntry, Service, TrackRecord};
pub use search::{levenshtein_distance, relevance};
pub use sqlite_catalog::SqliteTrackCatalog;

use std::path::Path;
use thiserror::Error;

/// Errors surfaced by catalog operations. Database failures are wrapped so
/// callers never see raw driver errors; the connection itself stays usable
/// after a failed statement.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("track not found: {0}")]
    TrackNotFound(String),
    #[error("playlist not found: {0}")]
    PlaylistNotFound(String),
    #[error("{0}")]
    Invalid(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Persistence contract consumed by the cache store, the scoring policy, the
/// acquisition pipeline, and the (external) playback layer.
pub trait TrackCatalog: Send + Sync {
    fn get(&self, track_id: &str) -> CatalogResult<Option<TrackRecord>>;

    fn get_all(&self) -> CatalogResult<Vec<TrackRecord>>;

    /// Relevance-scored fuzzy search over title and artist. An empty query
    /// returns the default ordering (by play count, descending).
    fn search(&self, query: &str, limit: usize) -> CatalogResult<Vec<TrackRecord>>;

    /// Atomic `plays` increment plus `last_played_at` update.
    fn record_play(&self, track_id: &str) -> CatalogResult<()>;

    /// Atomic `skips` increment.
    fn record_skip(&self, track_id: &str) -> CatalogResult<()>;

    fn upsert(&self, track: &TrackRecord) -> CatalogResult<()>;

    /// Delete a track row; playlist entries cascade. The caller is expected
    /// to evict any cached file first (the cache store owns file deletion so
    /// the cached-state invariant cannot be broken half-way).
    fn delete(&self, track_id: &str) -> CatalogResult<bool>;

    fn set_resolved_link(&self, track_id: &str, url: &str, service: Service) -> CatalogResult<()>;

    /// Mark a track cached at `path` with its committed byte size.
    fn set_cached(&self, track_id: &str, path: &Path, bytes: u64) -> CatalogResult<()>;

    /// Clear the cached-state fields. Idempotent; a missing row is a no-op
    /// so eviction can race with track deletion.
    fn clear_cached(&self, track_id: &str) -> CatalogResult<()>;

    fn list_cached(&self) -> CatalogResult<Vec<TrackRecord>>;

    /// Delete uncached tracks whose last play (or creation, if never played)
    /// is older than the retention window. Cached tracks are never pruned.
    /// Returns the number of rows deleted.
    fn prune_stale(&self, retention_days: u32) -> CatalogResult<usize>;

    /// Apply a title/artist change, regenerating the derived id and
    /// rewriting playlist references. `new_cache_path` carries the moved
    /// cache file location when the track was cached.
    fn rename_track(
        &self,
        track_id: &str,
        new_title: &str,
        new_artist: &str,
        new_cache_path: Option<&Path>,
    ) -> CatalogResult<TrackRecord>;

    // === Playlists ===

    fn create_playlist(
        &self,
        name: &str,
        owner_id: &str,
        description: Option<&str>,
    ) -> CatalogResult<Playlist>;

    fn get_playlist(&self, playlist_id: &str) -> CatalogResult<Option<Playlist>>;

    fn list_playlists(&self) -> CatalogResult<Vec<Playlist>>;

    fn delete_playlist(&self, playlist_id: &str) -> CatalogResult<bool>;

    /// Append a track; returns its 1-based position. Re-adding an existing
    /// member returns the current position without duplicating it.
    fn add_to_playlist(&self, playlist_id: &str, track_id: &str) -> CatalogResult<u32>;

    /// Remove a member and compact the remaining positions.
    fn remove_from_playlist(&self, playlist_id: &str, track_id: &str) -> CatalogResult<bool>;

    /// Member tracks ordered by position.
    fn playlist_tracks(&self, playlist_id: &str) -> CatalogResult<Vec<TrackRecord>>;
}
