mod file_config;

pub use file_config::{
    DownloaderFileConfig, FileConfig, MaintenanceFileConfig, ResolverFileConfig,
};

use crate::acquisition::AcquirerConfig;
use crate::downloader::DownloaderConfig;
use crate::resolver::ResolverConfig;
use anyhow::{bail, Context, Result};
use byte_unit::Byte;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024 * 1024; // 10 GiB
const DEFAULT_DOWNLOAD_SPEED: u64 = 2 * 1024 * 1024; // 2 MiB/s

/// CLI arguments that participate in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    pub max_cache_size: Option<String>,
    pub download_speed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub cache_cleanup_interval: Duration,
    pub catalog_prune_interval: Duration,
    pub catalog_retention_days: u32,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            cache_cleanup_interval: Duration::from_secs(6 * 3600),
            catalog_prune_interval: Duration::from_secs(24 * 3600),
            catalog_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub cache_root: PathBuf,
    /// Cache byte budget.
    pub max_cache_size: u64,
    /// Per-download rate cap in bytes/sec; zero disables throttling.
    pub download_speed: u64,
    pub resolver: ResolverConfig,
    pub downloader: DownloaderConfig,
    pub maintenance: MaintenanceSettings,
}

impl AppConfig {
    /// Resolve configuration. Precedence per value: environment
    /// (`MAX_CACHE_SIZE`, `DOWNLOAD_SPEED`) over TOML over CLI over default.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        Self::resolve_with_env(cli, file_config, |name| std::env::var(name).ok())
    }

    fn resolve_with_env(
        cli: &CliConfig,
        file_config: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in the config file")
            })?;

        let cache_root = file
            .cache_root
            .map(PathBuf::from)
            .or_else(|| cli.cache_root.clone())
            .unwrap_or_else(|| {
                db_path
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("cache")
            });

        let max_cache_size = match env("MAX_CACHE_SIZE")
            .or(file.max_cache_size)
            .or_else(|| cli.max_cache_size.clone())
        {
            Some(raw) => parse_byte_size(&raw)
                .with_context(|| format!("Invalid MAX_CACHE_SIZE value '{}'", raw))?,
            None => DEFAULT_MAX_CACHE_SIZE,
        };
        if max_cache_size == 0 {
            bail!("MAX_CACHE_SIZE must be greater than zero");
        }

        let download_speed = match env("DOWNLOAD_SPEED")
            .or(file.download_speed)
            .or_else(|| cli.download_speed.clone())
        {
            Some(raw) => parse_download_speed(&raw)
                .with_context(|| format!("Invalid DOWNLOAD_SPEED value '{}'", raw))?,
            None => DEFAULT_DOWNLOAD_SPEED,
        };

        let resolver_file = file.resolver.unwrap_or_default();
        let resolver_defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            cache_ttl_days: resolver_file
                .cache_ttl_days
                .unwrap_or(resolver_defaults.cache_ttl_days),
            probe_timeout: resolver_file
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(resolver_defaults.probe_timeout),
            fetch_timeout: resolver_file
                .fetch_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(resolver_defaults.fetch_timeout),
        };

        let downloader_file = file.downloader.unwrap_or_default();
        let downloader_defaults = DownloaderConfig::default();
        let downloader = DownloaderConfig {
            timeout: downloader_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(downloader_defaults.timeout),
            connect_timeout: downloader_file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(downloader_defaults.connect_timeout),
            min_viable_bytes: downloader_file
                .min_viable_bytes
                .unwrap_or(downloader_defaults.min_viable_bytes),
            max_redirect_hops: downloader_file
                .max_redirect_hops
                .unwrap_or(downloader_defaults.max_redirect_hops),
        };

        let maintenance_file = file.maintenance.unwrap_or_default();
        let maintenance_defaults = MaintenanceSettings::default();
        let maintenance = MaintenanceSettings {
            cache_cleanup_interval: maintenance_file
                .cache_cleanup_interval_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(maintenance_defaults.cache_cleanup_interval),
            catalog_prune_interval: maintenance_file
                .catalog_prune_interval_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(maintenance_defaults.catalog_prune_interval),
            catalog_retention_days: maintenance_file
                .catalog_retention_days
                .unwrap_or(maintenance_defaults.catalog_retention_days),
        };

        Ok(Self {
            db_path,
            cache_root,
            max_cache_size,
            download_speed,
            resolver,
            downloader,
            maintenance,
        })
    }

    pub fn acquirer_config(&self) -> AcquirerConfig {
        AcquirerConfig {
            download_speed: self.download_speed,
            resolved_link_ttl_days: self.resolver.cache_ttl_days,
            ..AcquirerConfig::default()
        }
    }
}

/// Parse "10GiB", "500 MB", or plain byte counts.
fn parse_byte_size(raw: &str) -> Result<u64> {
    let byte = Byte::parse_str(raw.trim(), true)
        .map_err(|e| anyhow::anyhow!("unparseable byte size: {}", e))?;
    Ok(byte.as_u64())
}

/// Like [`parse_byte_size`], but zero or negative disables throttling.
fn parse_download_speed(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Ok(0);
    }
    parse_byte_size(trimmed)
}
