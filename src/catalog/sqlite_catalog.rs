use super::models::{derive_track_id, Playlist, Service, TrackRecord};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::search::relevance;
use super::{CatalogError, CatalogResult, TrackCatalog};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed [`TrackCatalog`].
///
/// A single connection behind a mutex; catalog traffic is light (one bot's
/// library) and serializing writes keeps the counter updates trivially atomic.
pub struct SqliteTrackCatalog {
    conn: Mutex<Connection>,
}

impl SqliteTrackCatalog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open catalog database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            info!("Creating new catalog database at {:?}", path);
            CATALOG_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                anyhow::bail!(
                    "Catalog database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let current_schema_version = CATALOG_VERSIONED_SCHEMAS.last().unwrap().version as i64;

            let version_index = CATALOG_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown catalog database version {}", db_version))?;
            CATALOG_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Catalog database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if db_version < current_schema_version {
                info!(
                    "Migrating catalog database from version {} to {}",
                    db_version, current_schema_version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in CATALOG_VERSIONED_SCHEMAS.iter() {
            if schema.version > from_version {
                info!(
                    "Running catalog migration from version {} to {}",
                    latest_from, schema.version
                );
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<TrackRecord> {
        let service_str: String = row.get("service")?;
        let cache_path: Option<String> = row.get("cache_path")?;
        Ok(TrackRecord {
            id: row.get("id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            genre: row.get("genre")?,
            description: row.get("description")?,
            source_link: row.get("source_link")?,
            resolved_link: row.get("resolved_link")?,
            resolved_at: ts_opt(row.get("resolved_at")?),
            service: Service::from_str(&service_str).unwrap_or(Service::Direct),
            plays: row.get::<_, i64>("plays")?.max(0) as u32,
            skips: row.get::<_, i64>("skips")?.max(0) as u32,
            is_cached: row.get::<_, i64>("is_cached")? != 0,
            cache_path: cache_path.map(Into::into),
            cache_bytes: row.get::<_, Option<i64>>("cache_bytes")?.map(|b| b.max(0) as u64),
            last_cached_at: ts_opt(row.get("last_cached_at")?),
            last_played_at: ts_opt(row.get("last_played_at")?),
            added_at: ts_opt(Some(row.get("added_at")?)).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_playlist(row: &rusqlite::Row) -> rusqlite::Result<Playlist> {
        Ok(Playlist {
            id: row.get("id")?,
            name: row.get("name")?,
            owner_id: row.get("owner_id")?,
            description: row.get("description")?,
            created_at: ts_opt(Some(row.get("created_at")?)).unwrap_or_else(Utc::now),
        })
    }
}

fn ts_opt(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
}

fn to_ts(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

const TRACK_COLUMNS: &str = "id, title, artist, genre, description, source_link, resolved_link, \
     resolved_at, service, plays, skips, is_cached, cache_path, cache_bytes, last_cached_at, \
     last_played_at, added_at";

impl TrackCatalog for SqliteTrackCatalog {
    fn get(&self, track_id: &str) -> CatalogResult<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?1", TRACK_COLUMNS),
                params![track_id],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_all(&self) -> CatalogResult<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracks ORDER BY artist, title",
            TRACK_COLUMNS
        ))?;
        let tracks = stmt
            .query_map([], Self::row_to_track)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    fn search(&self, query: &str, limit: usize) -> CatalogResult<Vec<TrackRecord>> {
        if query.trim().is_empty() {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tracks ORDER BY plays DESC, title ASC LIMIT ?1",
                TRACK_COLUMNS
            ))?;
            let tracks = stmt
                .query_map(params![limit as i64], Self::row_to_track)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(tracks);
        }

        let mut scored: Vec<(u32, TrackRecord)> = self
            .get_all()?
            .into_iter()
            .filter_map(|track| {
                let score = relevance(query, &track);
                (score > 0).then_some((score, track))
            })
            .collect();
        // Relevance first, play count as the tiebreak.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.plays.cmp(&a.1.plays)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, track)| track)
            .collect())
    }

    fn record_play(&self, track_id: &str) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET plays = plays + 1, last_played_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp(), track_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::TrackNotFound(track_id.to_string()));
        }
        Ok(())
    }

    fn record_skip(&self, track_id: &str) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET skips = skips + 1 WHERE id = ?1",
            params![track_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::TrackNotFound(track_id.to_string()));
        }
        Ok(())
    }

    fn upsert(&self, track: &TrackRecord) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks (id, title, artist, genre, description, source_link, \
             resolved_link, resolved_at, service, plays, skips, is_cached, cache_path, \
             cache_bytes, last_cached_at, last_played_at, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
             ON CONFLICT(id) DO UPDATE SET \
             title = excluded.title, artist = excluded.artist, genre = excluded.genre, \
             description = excluded.description, source_link = excluded.source_link, \
             resolved_link = excluded.resolved_link, resolved_at = excluded.resolved_at, \
             service = excluded.service, plays = excluded.plays, skips = excluded.skips, \
             is_cached = excluded.is_cached, cache_path = excluded.cache_path, \
             cache_bytes = excluded.cache_bytes, last_cached_at = excluded.last_cached_at, \
             last_played_at = excluded.last_played_at",
            params![
                track.id,
                track.title,
                track.artist,
                track.genre,
                track.description,
                track.source_link,
                track.resolved_link,
                track.resolved_at.as_ref().map(to_ts),
                track.service.as_str(),
                track.plays as i64,
                track.skips as i64,
                track.is_cached as i64,
                track.cache_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                track.cache_bytes.map(|b| b as i64),
                track.last_cached_at.as_ref().map(to_ts),
                track.last_played_at.as_ref().map(to_ts),
                to_ts(&track.added_at),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, track_id: &str) -> CatalogResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        Ok(deleted > 0)
    }

    fn set_resolved_link(&self, track_id: &str, url: &str, service: Service) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET resolved_link = ?1, resolved_at = ?2, service = ?3 WHERE id = ?4",
            params![url, Utc::now().timestamp(), service.as_str(), track_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::TrackNotFound(track_id.to_string()));
        }
        Ok(())
    }

    fn set_cached(&self, track_id: &str, path: &Path, bytes: u64) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET is_cached = 1, cache_path = ?1, cache_bytes = ?2, \
             last_cached_at = ?3 WHERE id = ?4",
            params![
                path.to_string_lossy().to_string(),
                bytes as i64,
                Utc::now().timestamp(),
                track_id
            ],
        )?;
        if updated == 0 {
            return Err(CatalogError::TrackNotFound(track_id.to_string()));
        }
        Ok(())
    }

    fn clear_cached(&self, track_id: &str) -> CatalogResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tracks SET is_cached = 0, cache_path = NULL, cache_bytes = NULL WHERE id = ?1",
            params![track_id],
        )?;
        Ok(())
    }

    fn list_cached(&self) -> CatalogResult<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracks WHERE is_cached = 1",
            TRACK_COLUMNS
        ))?;
        let tracks = stmt
            .query_map([], Self::row_to_track)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    fn prune_stale(&self, retention_days: u32) -> CatalogResult<usize> {
        let cutoff = Utc::now().timestamp() - retention_days as i64 * 24 * 60 * 60;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM tracks WHERE is_cached = 0 \
             AND COALESCE(last_played_at, added_at) < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn rename_track(
        &self,
        track_id: &str,
        new_title: &str,
        new_artist: &str,
        new_cache_path: Option<&Path>,
    ) -> CatalogResult<TrackRecord> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut track = tx
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?1", TRACK_COLUMNS),
                params![track_id],
                Self::row_to_track,
            )
            .optional()?
            .ok_or_else(|| CatalogError::TrackNotFound(track_id.to_string()))?;

        let new_id = derive_track_id(new_title, new_artist);
        let new_cache_path_str =
            new_cache_path.map(|p| p.to_string_lossy().to_string());

        if new_id == track.id {
            tx.execute(
                "UPDATE tracks SET title = ?1, artist = ?2 WHERE id = ?3",
                params![new_title, new_artist, track_id],
            )?;
        } else {
            let collision: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM tracks WHERE id = ?1",
                    params![new_id],
                    |row| row.get(0),
                )
                .optional()?;
            if collision.is_some() {
                return Err(CatalogError::Invalid(format!(
                    "a track with identity {} / {} already exists",
                    new_artist, new_title
                )));
            }

            // The id is a primary key referenced by playlist rows, so the
            // rename is insert-new, repoint-children, delete-old.
            tx.execute(
                "INSERT INTO tracks (id, title, artist, genre, description, source_link, \
                 resolved_link, resolved_at, service, plays, skips, is_cached, cache_path, \
                 cache_bytes, last_cached_at, last_played_at, added_at) \
                 SELECT ?1, ?2, ?3, genre, description, source_link, resolved_link, \
                 resolved_at, service, plays, skips, is_cached, ?4, cache_bytes, \
                 last_cached_at, last_played_at, added_at FROM tracks WHERE id = ?5",
                params![
                    new_id,
                    new_title,
                    new_artist,
                    new_cache_path_str
                        .clone()
                        .or_else(|| track.cache_path.as_ref().map(|p| p.to_string_lossy().to_string())),
                    track_id
                ],
            )?;
            tx.execute(
                "UPDATE playlist_tracks SET track_id = ?1 WHERE track_id = ?2",
                params![new_id, track_id],
            )?;
            tx.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        }

        if let Some(path) = &new_cache_path_str {
            tx.execute(
                "UPDATE tracks SET cache_path = ?1 WHERE id = ?2",
                params![path, new_id],
            )?;
        }

        tx.commit()?;

        track.id = new_id;
        track.title = new_title.to_string();
        track.artist = new_artist.to_string();
        if let Some(path) = new_cache_path {
            track.cache_path = Some(path.to_path_buf());
        }
        Ok(track)
    }

    fn create_playlist(
        &self,
        name: &str,
        owner_id: &str,
        description: Option<&str>,
    ) -> CatalogResult<Playlist> {
        let playlist = Playlist {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            description: description.map(String::from),
            created_at: Utc::now(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO playlists (id, name, owner_id, description, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                playlist.id,
                playlist.name,
                playlist.owner_id,
                playlist.description,
                to_ts(&playlist.created_at)
            ],
        )?;
        Ok(playlist)
    }

    fn get_playlist(&self, playlist_id: &str) -> CatalogResult<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let playlist = conn
            .query_row(
                "SELECT id, name, owner_id, description, created_at FROM playlists WHERE id = ?1",
                params![playlist_id],
                Self::row_to_playlist,
            )
            .optional()?;
        Ok(playlist)
    }

    fn list_playlists(&self) -> CatalogResult<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, owner_id, description, created_at FROM playlists ORDER BY name",
        )?;
        let playlists = stmt
            .query_map([], Self::row_to_playlist)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(playlists)
    }

    fn delete_playlist(&self, playlist_id: &str) -> CatalogResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
        Ok(deleted > 0)
    }

    fn add_to_playlist(&self, playlist_id: &str, track_id: &str) -> CatalogResult<u32> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let playlist_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM playlists WHERE id = ?1",
                params![playlist_id],
                |row| row.get(0),
            )
            .optional()?;
        if playlist_exists.is_none() {
            return Err(CatalogError::PlaylistNotFound(playlist_id.to_string()));
        }

        let track_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM tracks WHERE id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        if track_exists.is_none() {
            return Err(CatalogError::TrackNotFound(track_id.to_string()));
        }

        if let Some(position) = tx
            .query_row(
                "SELECT position FROM playlist_tracks WHERE playlist_id = ?1 AND track_id = ?2",
                params![playlist_id, track_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            return Ok(position.max(0) as u32);
        }

        let next_position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_tracks WHERE playlist_id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO playlist_tracks (playlist_id, track_id, position) VALUES (?1, ?2, ?3)",
            params![playlist_id, track_id, next_position],
        )?;
        tx.commit()?;
        Ok(next_position as u32)
    }

    fn remove_from_playlist(&self, playlist_id: &str, track_id: &str) -> CatalogResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let position: Option<i64> = tx
            .query_row(
                "SELECT position FROM playlist_tracks WHERE playlist_id = ?1 AND track_id = ?2",
                params![playlist_id, track_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(position) = position else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1 AND track_id = ?2",
            params![playlist_id, track_id],
        )?;
        // Keep positions dense.
        tx.execute(
            "UPDATE playlist_tracks SET position = position - 1 \
             WHERE playlist_id = ?1 AND position > ?2",
            params![playlist_id, position],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn playlist_tracks(&self, playlist_id: &str) -> CatalogResult<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracks t \
             JOIN playlist_tracks pt ON pt.track_id = t.id \
             WHERE pt.playlist_id = ?1 ORDER BY pt.position",
            TRACK_COLUMNS
                .split(", ")
                .map(|c| format!("t.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let tracks = stmt
            .query_map(params![playlist_id], Self::row_to_track)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_catalog() -> (SqliteTrackCatalog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let catalog = SqliteTrackCatalog::new(temp_dir.path().join("catalog.db")).unwrap();
        (catalog, temp_dir)
    }

    #[test]
    fn test_upsert_and_get_roundtrip() {
        let (catalog, _tmp) = make_catalog();

        let track = TrackRecord::new("Flim", "Aphex Twin")
            .with_source_link("https://www.dropbox.com/s/abc/flim.mp3?dl=0")
            .with_genre("idm");
        catalog.upsert(&track).unwrap();

        let loaded = catalog.get(&track.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Flim");
        assert_eq!(loaded.artist, "Aphex Twin");
        assert_eq!(loaded.genre.as_deref(), Some("idm"));
        assert_eq!(
            loaded.source_link.as_deref(),
            Some("https://www.dropbox.com/s/abc/flim.mp3?dl=0")
        );
        assert_eq!(loaded.service, Service::Direct);
        assert!(!loaded.is_cached);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (catalog, _tmp) = make_catalog();
        assert!(catalog.get("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_record_play_and_skip() {
        let (catalog, _tmp) = make_catalog();
        let track = TrackRecord::new("Flim", "Aphex Twin");
        catalog.upsert(&track).unwrap();

        catalog.record_play(&track.id).unwrap();
        catalog.record_play(&track.id).unwrap();
        catalog.record_skip(&track.id).unwrap();

        let loaded = catalog.get(&track.id).unwrap().unwrap();
        assert_eq!(loaded.plays, 2);
        assert_eq!(loaded.skips, 1);
        assert!(loaded.last_played_at.is_some());
    }

    #[test]
    fn test_record_play_unknown_track_fails() {
        let (catalog, _tmp) = make_catalog();
        let err = catalog.record_play("missing").unwrap_err();
        assert!(matches!(err, CatalogError::TrackNotFound(_)));
    }

    #[test]
    fn test_set_and_clear_cached() {
        let (catalog, _tmp) = make_catalog();
        let track = TrackRecord::new("Flim", "Aphex Twin");
        catalog.upsert(&track).unwrap();

        catalog
            .set_cached(&track.id, Path::new("/cache/ab/abcd"), 4096)
            .unwrap();
        let loaded = catalog.get(&track.id).unwrap().unwrap();
        assert!(loaded.is_cached);
        assert_eq!(loaded.cache_bytes, Some(4096));
        assert!(loaded.last_cached_at.is_some());

        catalog.clear_cached(&track.id).unwrap();
        let loaded = catalog.get(&track.id).unwrap().unwrap();
        assert!(!loaded.is_cached);
        assert!(loaded.cache_path.is_none());
        assert!(loaded.cache_bytes.is_none());

        // Clearing again (or for a deleted row) is a no-op.
        catalog.clear_cached(&track.id).unwrap();
        catalog.clear_cached("missing").unwrap();
    }

    #[test]
    fn test_set_resolved_link() {
        let (catalog, _tmp) = make_catalog();
        let track = TrackRecord::new("Flim", "Aphex Twin");
        catalog.upsert(&track).unwrap();

        catalog
            .set_resolved_link(&track.id, "https://dl.example.com/flim.mp3", Service::Dropbox)
            .unwrap();
        let loaded = catalog.get(&track.id).unwrap().unwrap();
        assert_eq!(
            loaded.resolved_link.as_deref(),
            Some("https://dl.example.com/flim.mp3")
        );
        assert_eq!(loaded.service, Service::Dropbox);
        assert!(loaded.resolved_at.is_some());
    }

    #[test]
    fn test_search_empty_query_orders_by_plays() {
        let (catalog, _tmp) = make_catalog();
        let mut a = TrackRecord::new("Alpha", "Artist");
        a.plays = 1;
        let mut b = TrackRecord::new("Beta", "Artist");
        b.plays = 10;
        catalog.upsert(&a).unwrap();
        catalog.upsert(&b).unwrap();

        let results = catalog.search("", 10).unwrap();
        assert_eq!(results[0].title, "Beta");
        assert_eq!(results[1].title, "Alpha");
    }

    #[test]
    fn test_search_fuzzy_relevance() {
        let (catalog, _tmp) = make_catalog();
        catalog
            .upsert(&TrackRecord::new("Windowlicker", "Aphex Twin"))
            .unwrap();
        catalog
            .upsert(&TrackRecord::new("One More Time", "Daft Punk"))
            .unwrap();

        let results = catalog.search("windowliker", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Windowlicker");

        let results = catalog.search("daft", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "Daft Punk");
    }

    #[test]
    fn test_search_respects_limit() {
        let (catalog, _tmp) = make_catalog();
        for i in 0..5 {
            catalog
                .upsert(&TrackRecord::new(format!("Song {}", i), "Same Artist"))
                .unwrap();
        }
        let results = catalog.search("same", 3).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_delete_cascades_playlist_entries() {
        let (catalog, _tmp) = make_catalog();
        let track = TrackRecord::new("Flim", "Aphex Twin");
        catalog.upsert(&track).unwrap();
        let playlist = catalog.create_playlist("chill", "user-1", None).unwrap();
        catalog.add_to_playlist(&playlist.id, &track.id).unwrap();

        assert!(catalog.delete(&track.id).unwrap());
        assert!(catalog.playlist_tracks(&playlist.id).unwrap().is_empty());
        // Second delete reports nothing to do.
        assert!(!catalog.delete(&track.id).unwrap());
    }

    #[test]
    fn test_playlist_ordering_and_compaction() {
        let (catalog, _tmp) = make_catalog();
        let tracks: Vec<TrackRecord> = (0..3)
            .map(|i| TrackRecord::new(format!("Song {}", i), "Artist"))
            .collect();
        for track in &tracks {
            catalog.upsert(track).unwrap();
        }
        let playlist = catalog.create_playlist("set", "user-1", None).unwrap();
        for track in &tracks {
            catalog.add_to_playlist(&playlist.id, &track.id).unwrap();
        }

        // Remove the middle entry; positions compact and order is preserved.
        assert!(catalog
            .remove_from_playlist(&playlist.id, &tracks[1].id)
            .unwrap());
        let remaining = catalog.playlist_tracks(&playlist.id).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].title, "Song 0");
        assert_eq!(remaining[1].title, "Song 2");

        // Re-adding lands at the (dense) end.
        let position = catalog.add_to_playlist(&playlist.id, &tracks[1].id).unwrap();
        assert_eq!(position, 3);

        // Re-adding an existing member is idempotent.
        let position = catalog.add_to_playlist(&playlist.id, &tracks[0].id).unwrap();
        assert_eq!(position, 1);
    }

    #[test]
    fn test_prune_stale_spares_cached_and_recent() {
        let (catalog, _tmp) = make_catalog();

        let mut stale = TrackRecord::new("Stale", "Artist");
        stale.added_at = Utc::now() - chrono::Duration::days(120);
        let mut stale_cached = TrackRecord::new("Stale Cached", "Artist");
        stale_cached.added_at = Utc::now() - chrono::Duration::days(120);
        let fresh = TrackRecord::new("Fresh", "Artist");

        catalog.upsert(&stale).unwrap();
        catalog.upsert(&stale_cached).unwrap();
        catalog.upsert(&fresh).unwrap();
        catalog
            .set_cached(&stale_cached.id, Path::new("/cache/xx/yy"), 100)
            .unwrap();

        let pruned = catalog.prune_stale(90).unwrap();
        assert_eq!(pruned, 1);
        assert!(catalog.get(&stale.id).unwrap().is_none());
        assert!(catalog.get(&stale_cached.id).unwrap().is_some());
        assert!(catalog.get(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn test_prune_stale_uses_last_play_over_added_at() {
        let (catalog, _tmp) = make_catalog();
        let mut track = TrackRecord::new("Old But Played", "Artist");
        track.added_at = Utc::now() - chrono::Duration::days(200);
        track.last_played_at = Some(Utc::now() - chrono::Duration::days(5));
        catalog.upsert(&track).unwrap();

        assert_eq!(catalog.prune_stale(90).unwrap(), 0);
        assert!(catalog.get(&track.id).unwrap().is_some());
    }

    #[test]
    fn test_rename_track_regenerates_id_and_repoints_playlists() {
        let (catalog, _tmp) = make_catalog();
        let track = TrackRecord::new("Flim", "Aphex Twin");
        catalog.upsert(&track).unwrap();
        catalog.record_play(&track.id).unwrap();
        let playlist = catalog.create_playlist("chill", "user-1", None).unwrap();
        catalog.add_to_playlist(&playlist.id, &track.id).unwrap();

        let renamed = catalog
            .rename_track(&track.id, "Flim (Remaster)", "Aphex Twin", None)
            .unwrap();
        assert_ne!(renamed.id, track.id);
        assert_eq!(renamed.id, derive_track_id("Flim (Remaster)", "Aphex Twin"));

        assert!(catalog.get(&track.id).unwrap().is_none());
        let loaded = catalog.get(&renamed.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Flim (Remaster)");
        // Counters survive the rename.
        assert_eq!(loaded.plays, 1);

        let members = catalog.playlist_tracks(&playlist.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, renamed.id);
    }

    #[test]
    fn test_rename_track_collision_rejected() {
        let (catalog, _tmp) = make_catalog();
        let a = TrackRecord::new("Flim", "Aphex Twin");
        let b = TrackRecord::new("Other", "Aphex Twin");
        catalog.upsert(&a).unwrap();
        catalog.upsert(&b).unwrap();

        let err = catalog
            .rename_track(&b.id, "Flim", "Aphex Twin", None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
        // Both rows intact.
        assert!(catalog.get(&a.id).unwrap().is_some());
        assert!(catalog.get(&b.id).unwrap().is_some());
    }

    #[test]
    fn test_reopen_validates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("catalog.db");
        {
            let catalog = SqliteTrackCatalog::new(&db_path).unwrap();
            catalog.upsert(&TrackRecord::new("Flim", "Aphex Twin")).unwrap();
        }
        let catalog = SqliteTrackCatalog::new(&db_path).unwrap();
        assert_eq!(catalog.get_all().unwrap().len(), 1);
    }
}
