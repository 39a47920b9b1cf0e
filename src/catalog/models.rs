//! Data models for the track catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Hosting service a share link points at.
///
/// `Direct` covers both genuinely direct URLs and anything we could not
/// classify; those links are passed through resolution unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Dropbox,
    GoogleDrive,
    Mediafire,
    Mega,
    OneDrive,
    Terabox,
    Pixeldrain,
    GitHub,
    SourceForge,
    Direct,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Dropbox => "dropbox",
            Service::GoogleDrive => "google_drive",
            Service::Mediafire => "mediafire",
            Service::Mega => "mega",
            Service::OneDrive => "onedrive",
            Service::Terabox => "terabox",
            Service::Pixeldrain => "pixeldrain",
            Service::GitHub => "github",
            Service::SourceForge => "sourceforge",
            Service::Direct => "direct",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dropbox" => Some(Service::Dropbox),
            "google_drive" => Some(Service::GoogleDrive),
            "mediafire" => Some(Service::Mediafire),
            "mega" => Some(Service::Mega),
            "onedrive" => Some(Service::OneDrive),
            "terabox" => Some(Service::Terabox),
            "pixeldrain" => Some(Service::Pixeldrain),
            "github" => Some(Service::GitHub),
            "sourceforge" => Some(Service::SourceForge),
            "direct" => Some(Service::Direct),
            _ => None,
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record for a single track.
///
/// Invariant: `is_cached == true` implies `cache_path` is set and the file at
/// that path exists and is non-empty. The cache store is the only writer of
/// the cached-state fields and flips them together with the file operation.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    /// Stable identifier derived from normalized artist + title.
    /// Immutable once assigned; metadata renames go through
    /// [`TrackCatalog::rename_track`](super::TrackCatalog::rename_track).
    pub id: String,
    pub title: String,
    pub artist: String,
    pub genre: Option<String>,
    pub description: Option<String>,
    /// Share URL as originally provided by the operator.
    pub source_link: Option<String>,
    /// Last successfully resolved direct URL. May expire upstream.
    pub resolved_link: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub service: Service,
    pub plays: u32,
    pub skips: u32,
    pub is_cached: bool,
    pub cache_path: Option<PathBuf>,
    /// On-disk size recorded at commit time, for usage accounting.
    pub cache_bytes: Option<u64>,
    pub last_cached_at: Option<DateTime<Utc>>,
    pub last_played_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

impl TrackRecord {
    /// Create a fresh record with a derived id and zeroed counters.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        let title = title.into();
        let artist = artist.into();
        Self {
            id: derive_track_id(&title, &artist),
            title,
            artist,
            genre: None,
            description: None,
            source_link: None,
            resolved_link: None,
            resolved_at: None,
            service: Service::Direct,
            plays: 0,
            skips: 0,
            is_cached: false,
            cache_path: None,
            cache_bytes: None,
            last_cached_at: None,
            last_played_at: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_source_link(mut self, link: impl Into<String>) -> Self {
        self.source_link = Some(link.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }
}

/// Derive the stable track id from title and artist.
///
/// First 16 hex chars of SHA-256 over the normalized identity. Collisions at
/// 64 bits are not a practical concern for a single bot's library.
pub fn derive_track_id(title: &str, artist: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_identity(artist).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_identity(title).as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lowercase, trim, and collapse internal whitespace so cosmetic differences
/// ("Daft  Punk" vs "daft punk") do not mint distinct identities.
fn normalize_identity(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A named, ordered collection of tracks.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Membership row: `position` is dense and 1-based within a playlist;
/// removal compacts the remaining positions in the same transaction.
#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub playlist_id: String,
    pub track_id: String,
    pub position: u32,
}
