//! TOML file configuration.
//!
//! Every field is optional; [`AppConfig::resolve`](super::AppConfig::resolve)
//! merges file values over CLI values and fills defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Path to the catalog SQLite database.
    pub db_path: Option<String>,
    /// Cache root directory.
    pub cache_root: Option<String>,
    /// Cache byte budget, human-readable ("10GiB") or raw bytes.
    pub max_cache_size: Option<String>,
    /// Per-download rate cap, human-readable ("2MiB") or raw bytes/sec.
    pub download_speed: Option<String>,
    pub resolver: Option<ResolverFileConfig>,
    pub downloader: Option<DownloaderFileConfig>,
    pub maintenance: Option<MaintenanceFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverFileConfig {
    pub cache_ttl_days: Option<i64>,
    pub probe_timeout_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloaderFileConfig {
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub min_viable_bytes: Option<u64>,
    pub max_redirect_hops: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceFileConfig {
    pub cache_cleanup_interval_hours: Option<u64>,
    pub catalog_prune_interval_hours: Option<u64>,
    pub catalog_retention_days: Option<u32>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config file {:?}", path))
    }
}
