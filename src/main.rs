use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunevault::acquisition::MediaAcquirer;
use tunevault::cache::CacheStore;
use tunevault::catalog::{SqliteTrackCatalog, TrackCatalog};
use tunevault::config::{AppConfig, CliConfig, FileConfig};
use tunevault::downloader::RateLimitedDownloader;
use tunevault::maintenance::{self, jobs::CacheCleanupJob, jobs::CatalogPruneJob, MaintenanceJob};
use tunevault::resolver::LinkResolver;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(about = "Media acquisition and cache core for a chat-bot music player")]
struct CliArgs {
    /// Path to the SQLite catalog database file.
    #[clap(long, value_parser = parse_path)]
    db_path: Option<PathBuf>,

    /// Cache root directory (default: "cache" next to the catalog db).
    #[clap(long, value_parser = parse_path)]
    cache_root: Option<PathBuf>,

    /// Optional TOML config file; its values override CLI flags.
    #[clap(long, value_parser = parse_path)]
    config: Option<PathBuf>,

    /// Cache byte budget, e.g. "10GiB". Env MAX_CACHE_SIZE overrides.
    #[clap(long)]
    max_cache_size: Option<String>,

    /// Per-download rate cap, e.g. "2MiB". Zero disables throttling.
    /// Env DOWNLOAD_SPEED overrides.
    #[clap(long)]
    download_speed: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background maintenance loops until interrupted.
    Run,
    /// Register a track and resolve+verify its share link.
    Add {
        #[clap(long)]
        title: String,
        #[clap(long)]
        artist: String,
        #[clap(long)]
        link: String,
        #[clap(long)]
        genre: Option<String>,
    },
    /// Edit track metadata. Title/artist changes regenerate the id and
    /// move any cached file.
    Edit {
        id: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        artist: Option<String>,
        #[clap(long)]
        genre: Option<String>,
        #[clap(long)]
        description: Option<String>,
    },
    /// Remove a track, its cached file, and its playlist entries.
    Remove { id: String },
    /// Force-cache a track or a whole playlist.
    Preload {
        id: Option<String>,
        #[clap(long, conflicts_with = "id")]
        playlist: Option<String>,
    },
    /// Force-evict a track or a whole playlist, bypassing score ordering.
    Unload {
        id: Option<String>,
        #[clap(long, conflicts_with = "id")]
        playlist: Option<String>,
    },
    /// Fuzzy-search the catalog.
    Search {
        query: String,
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show catalog and cache statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        cache_root: cli_args.cache_root.clone(),
        max_cache_size: cli_args.max_cache_size.clone(),
        download_speed: cli_args.download_speed.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening catalog database at {:?}...", config.db_path);
    let catalog: Arc<dyn TrackCatalog> = Arc::new(SqliteTrackCatalog::new(&config.db_path)?);
    let cache = Arc::new(CacheStore::open(
        &config.cache_root,
        config.max_cache_size,
        catalog.clone(),
    )?);
    let resolver = Arc::new(LinkResolver::new(config.resolver.clone())?);
    let downloader = Arc::new(RateLimitedDownloader::new(config.downloader.clone())?);
    let acquirer = MediaAcquirer::new(
        resolver,
        downloader,
        cache.clone(),
        catalog.clone(),
        config.acquirer_config(),
    );

    match cli_args.command {
        Command::Run => run_maintenance(&config, cache, catalog).await,
        Command::Add {
            title,
            artist,
            link,
            genre,
        } => {
            let track = acquirer
                .register_track(&title, &artist, &link, genre.as_deref())
                .await?;
            println!(
                "Added {}: {} - {} ({})",
                track.id, track.artist, track.title, track.service
            );
            Ok(())
        }
        Command::Edit {
            id,
            title,
            artist,
            genre,
            description,
        } => {
            let existing = catalog
                .get(&id)?
                .with_context(|| format!("No track with id {}", id))?;

            let mut current_id = id.clone();
            if title.is_some() || artist.is_some() {
                let new_title = title.unwrap_or_else(|| existing.title.clone());
                let new_artist = artist.unwrap_or_else(|| existing.artist.clone());
                let renamed = acquirer.rename_track(&id, &new_title, &new_artist).await?;
                current_id = renamed.id;
            }

            if genre.is_some() || description.is_some() {
                let mut track = catalog
                    .get(&current_id)?
                    .with_context(|| format!("No track with id {}", current_id))?;
                if let Some(genre) = genre {
                    track.genre = Some(genre);
                }
                if let Some(description) = description {
                    track.description = Some(description);
                }
                catalog.upsert(&track)?;
            }

            println!("Updated track {}", current_id);
            Ok(())
        }
        Command::Remove { id } => {
            if acquirer.remove_track(&id).await? {
                println!("Removed track {}", id);
            } else {
                println!("No track with id {}", id);
            }
            Ok(())
        }
        Command::Preload { id, playlist } => match (id, playlist) {
            (Some(id), None) => {
                let path = acquirer.preload(&id).await?;
                println!("Cached {} at {:?}", id, path);
                Ok(())
            }
            (None, Some(playlist_id)) => {
                let outcome = acquirer.preload_playlist(&playlist_id).await?;
                println!(
                    "Preloaded playlist {}: {} cached, {} failed",
                    playlist_id, outcome.succeeded, outcome.failed
                );
                Ok(())
            }
            _ => bail!("Specify a track id or --playlist <id>"),
        },
        Command::Unload { id, playlist } => match (id, playlist) {
            (Some(id), None) => {
                acquirer.unload(&id).await?;
                println!("Evicted {}", id);
                Ok(())
            }
            (None, Some(playlist_id)) => {
                let outcome = acquirer.unload_playlist(&playlist_id).await?;
                println!(
                    "Unloaded playlist {}: {} evicted, {} failed",
                    playlist_id, outcome.succeeded, outcome.failed
                );
                Ok(())
            }
            _ => bail!("Specify a track id or --playlist <id>"),
        },
        Command::Search { query, limit } => {
            let results = catalog.search(&query, limit)?;
            if results.is_empty() {
                println!("No matches.");
            }
            for track in results {
                println!(
                    "{}  {} - {}  [plays {} skips {}{}]",
                    track.id,
                    track.artist,
                    track.title,
                    track.plays,
                    track.skips,
                    if track.is_cached { ", cached" } else { "" }
                );
            }
            Ok(())
        }
        Command::Stats => {
            let tracks = catalog.get_all()?;
            let cached = tracks.iter().filter(|t| t.is_cached).count();
            let usage = cache.usage().await;
            println!("Tracks:      {}", tracks.len());
            println!("Cached:      {}", cached);
            println!(
                "Cache usage: {} / {} bytes ({:.1}%)",
                usage,
                cache.max_size(),
                usage as f64 * 100.0 / cache.max_size() as f64
            );
            Ok(())
        }
    }
}

/// Run the maintenance loops until ctrl-c.
async fn run_maintenance(
    config: &AppConfig,
    cache: Arc<CacheStore>,
    catalog: Arc<dyn TrackCatalog>,
) -> Result<()> {
    let shutdown = tokio_util::sync::CancellationToken::new();
    let jobs: Vec<Arc<dyn MaintenanceJob>> = vec![
        Arc::new(CacheCleanupJob::new(
            cache,
            config.maintenance.cache_cleanup_interval,
        )),
        Arc::new(CatalogPruneJob::new(
            catalog,
            config.maintenance.catalog_prune_interval,
            config.maintenance.catalog_retention_days,
        )),
    ];
    let handles = maintenance::spawn_maintenance(jobs, shutdown.clone());

    info!("Maintenance loops running; press ctrl-c to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
    }

    info!("Shutting down...");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
