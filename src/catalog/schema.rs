//! Database schema for the track catalog.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("source_link", &SqlType::Text),
        sqlite_column!("resolved_link", &SqlType::Text),
        sqlite_column!("resolved_at", &SqlType::Integer),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("plays", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("skips", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!(
            "is_cached",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("cache_path", &SqlType::Text),
        sqlite_column!("cache_bytes", &SqlType::Integer),
        sqlite_column!("last_cached_at", &SqlType::Integer),
        sqlite_column!("last_played_at", &SqlType::Integer),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_tracks_is_cached", "is_cached"),
        ("idx_tracks_plays", "plays"),
        ("idx_tracks_last_played_at", "last_played_at"),
    ],
};

const PLAYLISTS_TABLE_V1: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_playlists_owner", "owner_id")],
};

const PLAYLIST_FK: ForeignKey = ForeignKey {
    foreign_table: "playlists",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const TRACK_FK: ForeignKey = ForeignKey {
    foreign_table: "tracks",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PLAYLIST_TRACKS_TABLE_V1: Table = Table {
    name: "playlist_tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&PLAYLIST_FK)
        ),
        sqlite_column!(
            "track_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_playlist_tracks_playlist", "playlist_id, position"),
        ("idx_playlist_tracks_track", "track_id"),
    ],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[TRACKS_TABLE_V1, PLAYLISTS_TABLE_V1, PLAYLIST_TRACKS_TABLE_V1],
    migration: None,
}];
