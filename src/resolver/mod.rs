//! Share-link resolution.
//!
//! Turns arbitrary cloud-share URLs into direct, byte-fetchable URLs: detect
//! the hosting service, apply its strategy (pattern rewrite, id extraction,
//! page scrape, or pass-through), verify the candidate with a lightweight
//! probe, and fall back to generic HTML extraction before giving up. Network
//! failures inside a strategy are logged and folded into the final
//! [`ResolveError`]; they never propagate raw.

mod html;
mod service;

pub use service::detect_service;

use crate::catalog::Service;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Terminal resolution failure: every service-specific and generic strategy
/// was exhausted. Carries per-attempt diagnostics for the operator.
#[derive(Debug, Error)]
#[error("could not resolve {url} to a direct link ({} attempts: {})", attempts.len(), attempts.join("; "))]
pub struct ResolveError {
    pub url: String,
    pub attempts: Vec<String>,
}

/// A verified direct URL plus how we got it.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub url: String,
    pub service: Service,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a successful resolution stays reusable without re-probing.
    pub cache_ttl_days: i64,
    /// Timeout for verification probes (HEAD / ranged GET).
    pub probe_timeout: Duration,
    /// Timeout for share-page fetches.
    pub fetch_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: 5,
            probe_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(20),
        }
    }
}

struct CachedResolution {
    link: ResolvedLink,
    expires_at: DateTime<Utc>,
}

pub struct LinkResolver {
    client: Client,
    config: ResolverConfig,
    cache: Mutex<HashMap<String, CachedResolution>>,
}

lazy_static! {
    static ref GDRIVE_ID_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"/file/d/([A-Za-z0-9_-]+)").unwrap(),
        Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").unwrap(),
    ];
    static ref GDRIVE_CONFIRM_TOKEN: Regex = Regex::new(r"confirm=([0-9A-Za-z_-]+)").unwrap();
    static ref GITHUB_BLOB: Regex =
        Regex::new(r"github\.com/([^/]+)/([^/]+)/blob/(.+)").unwrap();
    static ref PIXELDRAIN_ID: Regex = Regex::new(r"pixeldrain\.com/u/([A-Za-z0-9]+)").unwrap();
    static ref MEDIAFIRE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#"href="(https://download[^"]*?\.mediafire\.com/[^"]+)""#).unwrap(),
        Regex::new(r#"(?s)id="downloadButton".{0,300}?href="([^"]+)""#).unwrap(),
        Regex::new(r#"(?is)aria-label="download[^"]*"[^>]*href="([^"]+)""#).unwrap(),
    ];
    static ref TERABOX_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#""dlink"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#""downloadUrl"\s*:\s*"([^"]+)""#).unwrap(),
    ];
}

impl LinkResolver {
    pub fn new(config: ResolverConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout.max(config.probe_timeout))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_defaults() -> anyhow::Result<Self> {
        Self::new(ResolverConfig::default())
    }

    /// Resolve a share URL to a verified direct URL.
    ///
    /// A cache hit inside its TTL returns immediately with no network I/O.
    pub async fn resolve(&self, share_url: &str) -> Result<ResolvedLink, ResolveError> {
        if let Some(hit) = self.cache_lookup(share_url) {
            debug!("Resolution cache hit for {}", share_url);
            return Ok(hit);
        }

        let service = detect_service(share_url);
        let mut attempts: Vec<String> = Vec::new();

        if let Some(candidate) = self
            .service_candidate(share_url, service, &mut attempts)
            .await
        {
            if self.verify(&candidate).await {
                return Ok(self.cache_store(share_url, candidate, service));
            }
            attempts.push(format!(
                "{}: candidate {} failed verification",
                service, candidate
            ));
        }

        // Same page, different pattern set: the generic extraction pass.
        if let Some(candidate) = self.generic_html_pass(share_url, &mut attempts).await {
            if self.verify(&candidate).await {
                return Ok(self.cache_store(share_url, candidate, service));
            }
            attempts.push(format!(
                "generic: candidate {} failed verification",
                candidate
            ));
        }

        Err(ResolveError {
            url: share_url.to_string(),
            attempts,
        })
    }

    /// Drop any cached resolution for `share_url` (e.g. after a download
    /// against it failed with an expired-looking error).
    pub fn invalidate(&self, share_url: &str) {
        self.cache.lock().unwrap().remove(share_url);
    }

    async fn service_candidate(
        &self,
        url: &str,
        service: Service,
        attempts: &mut Vec<String>,
    ) -> Option<String> {
        let result: anyhow::Result<Option<String>> = match service {
            Service::Dropbox => Ok(Some(rewrite_dropbox(url))),
            Service::OneDrive => Ok(Some(rewrite_onedrive(url))),
            Service::GoogleDrive => self.resolve_google_drive(url).await,
            Service::Mediafire => self.scrape_for_link(url, &MEDIAFIRE_PATTERNS).await,
            Service::Terabox => self.scrape_for_link(url, &TERABOX_PATTERNS).await,
            Service::Pixeldrain => Ok(rewrite_pixeldrain(url)),
            Service::GitHub => Ok(Some(rewrite_github(url))),
            Service::SourceForge => Ok(Some(rewrite_sourceforge(url))),
            // Pass-through: these either serve bytes directly or cannot be
            // resolved without a client-side decryption step we don't do.
            Service::Mega | Service::Direct => Ok(Some(url.to_string())),
        };

        match result {
            Ok(Some(candidate)) => Some(candidate),
            Ok(None) => {
                attempts.push(format!("{}: no candidate produced", service));
                None
            }
            Err(err) => {
                warn!("Resolution strategy {} failed for {}: {}", service, url, err);
                attempts.push(format!("{}: {}", service, err));
                None
            }
        }
    }

    /// Google Drive: extract the file id, build the canonical export URL,
    /// and chase the interstitial confirmation page when one appears.
    async fn resolve_google_drive(&self, url: &str) -> anyhow::Result<Option<String>> {
        let Some(export) = drive_export_url(url) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&export)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        if is_html {
            let body = response.text().await.unwrap_or_default();
            if let Some(captures) = GDRIVE_CONFIRM_TOKEN.captures(&body) {
                let token = urlencoding::encode(&captures[1]).into_owned();
                return Ok(Some(format!("{}&confirm={}", export, token)));
            }
        }

        Ok(Some(export))
    }

    /// Fetch a share page and try each pattern in priority order. A body
    /// that does not decode as text means the "page" is already serving
    /// bytes, so the input URL itself is the candidate.
    async fn scrape_for_link(
        &self,
        url: &str,
        patterns: &[Regex],
    ) -> anyhow::Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;
        let bytes = response.bytes().await?;

        if looks_binary(&bytes) {
            return Ok(Some(url.to_string()));
        }

        let text = String::from_utf8_lossy(&bytes);
        for pattern in patterns {
            if let Some(captures) = pattern.captures(&text) {
                let candidate = captures[1].replace("\\/", "/").replace("&amp;", "&");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn generic_html_pass(
        &self,
        share_url: &str,
        attempts: &mut Vec<String>,
    ) -> Option<String> {
        let base = match Url::parse(share_url) {
            Ok(url) => url,
            Err(err) => {
                attempts.push(format!("generic: not a fetchable URL: {}", err));
                return None;
            }
        };

        let response = match self
            .client
            .get(share_url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("Generic page fetch failed for {}: {}", share_url, err);
                attempts.push(format!("generic: fetch failed: {}", err));
                return None;
            }
        };

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                attempts.push(format!("generic: body read failed: {}", err));
                return None;
            }
        };

        if looks_binary(&bytes) {
            return Some(share_url.to_string());
        }

        let text = String::from_utf8_lossy(&bytes);
        match html::extract_direct_link(&text, &base) {
            Some(candidate) => Some(candidate),
            None => {
                attempts.push("generic: no extractable link in page".to_string());
                None
            }
        }
    }

    /// Lightweight existence probe: HEAD first, then a 1-byte ranged GET for
    /// hosts that reject HEAD. 200 and 206 both count as fetchable.
    async fn verify(&self, url: &str) -> bool {
        match self
            .client
            .head(url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) if is_fetchable_status(response.status()) => return true,
            Ok(response) => {
                debug!("HEAD probe of {} returned {}", url, response.status());
            }
            Err(err) => {
                debug!("HEAD probe of {} failed: {}", url, err);
            }
        }

        match self
            .client
            .get(url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => is_fetchable_status(response.status()),
            Err(err) => {
                debug!("Ranged probe of {} failed: {}", url, err);
                false
            }
        }
    }

    fn cache_lookup(&self, share_url: &str) -> Option<ResolvedLink> {
        let mut cache = self.cache.lock().unwrap();
        let now = Utc::now();
        // Expired entries are purged lazily, on the next access.
        cache.retain(|_, entry| entry.expires_at > now);
        cache.get(share_url).map(|entry| entry.link.clone())
    }

    fn cache_store(&self, share_url: &str, url: String, service: Service) -> ResolvedLink {
        let link = ResolvedLink {
            url,
            service,
            resolved_at: Utc::now(),
        };
        self.cache.lock().unwrap().insert(
            share_url.to_string(),
            CachedResolution {
                link: link.clone(),
                expires_at: Utc::now() + ChronoDuration::days(self.config.cache_ttl_days),
            },
        );
        link
    }
}

fn is_fetchable_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT
}

/// A response body with NUL bytes in its head is not a page we can scrape.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(1024).any(|b| *b == 0)
}

fn rewrite_dropbox(url: &str) -> String {
    if url.contains("dl=0") {
        url.replace("dl=0", "dl=1")
    } else if url.contains("dl=1") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&dl=1", url)
    } else {
        format!("{}?dl=1", url)
    }
}

fn rewrite_onedrive(url: &str) -> String {
    if url.contains("onedrive.live.com/redir") {
        url.replace("/redir", "/download")
    } else if url.contains("download=1") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&download=1", url)
    } else {
        format!("{}?download=1", url)
    }
}

fn rewrite_pixeldrain(url: &str) -> Option<String> {
    PIXELDRAIN_ID
        .captures(url)
        .map(|captures| format!("https://pixeldrain.com/api/file/{}?download", &captures[1]))
}

fn rewrite_github(url: &str) -> String {
    if let Some(captures) = GITHUB_BLOB.captures(url) {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}",
            &captures[1], &captures[2], &captures[3]
        )
    } else {
        // Release assets and raw links already serve bytes.
        url.to_string()
    }
}

fn rewrite_sourceforge(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/download") {
        trimmed.to_string()
    } else {
        format!("{}/download", trimmed)
    }
}

/// Canonical Google Drive export URL for any recognized share-URL shape.
pub fn drive_export_url(share_url: &str) -> Option<String> {
    for pattern in GDRIVE_ID_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(share_url) {
            let id = urlencoding::encode(&captures[1]).into_owned();
            return Some(format!(
                "https://drive.google.com/uc?export=download&id={}",
                id
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_dropbox_flips_preview_flag() {
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/x.mp3?dl=0"),
            "https://www.dropbox.com/s/abc/x.mp3?dl=1"
        );
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/x.mp3"),
            "https://www.dropbox.com/s/abc/x.mp3?dl=1"
        );
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/x.mp3?raw=1"),
            "https://www.dropbox.com/s/abc/x.mp3?raw=1&dl=1"
        );
        // Already a download link: untouched.
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/x.mp3?dl=1"),
            "https://www.dropbox.com/s/abc/x.mp3?dl=1"
        );
    }

    #[test]
    fn test_drive_export_url_from_file_shape() {
        assert_eq!(
            drive_export_url("https://drive.google.com/file/d/ABC123/view").as_deref(),
            Some("https://drive.google.com/uc?export=download&id=ABC123")
        );
    }

    #[test]
    fn test_drive_export_url_from_open_shape() {
        assert_eq!(
            drive_export_url("https://drive.google.com/open?id=XYZ_9-8").as_deref(),
            Some("https://drive.google.com/uc?export=download&id=XYZ_9-8")
        );
    }

    #[test]
    fn test_drive_export_url_no_id() {
        assert_eq!(drive_export_url("https://drive.google.com/drive/my-drive"), None);
    }

    #[test]
    fn test_rewrite_onedrive() {
        assert_eq!(
            rewrite_onedrive("https://onedrive.live.com/redir?resid=123"),
            "https://onedrive.live.com/download?resid=123"
        );
        assert_eq!(
            rewrite_onedrive("https://1drv.ms/u/s!abc"),
            "https://1drv.ms/u/s!abc?download=1"
        );
    }

    #[test]
    fn test_rewrite_pixeldrain() {
        assert_eq!(
            rewrite_pixeldrain("https://pixeldrain.com/u/a1B2c3").as_deref(),
            Some("https://pixeldrain.com/api/file/a1B2c3?download")
        );
        assert_eq!(rewrite_pixeldrain("https://pixeldrain.com/about"), None);
    }

    #[test]
    fn test_rewrite_github_blob() {
        assert_eq!(
            rewrite_github("https://github.com/user/repo/blob/main/music/a.mp3"),
            "https://raw.githubusercontent.com/user/repo/main/music/a.mp3"
        );
        // Release asset is already direct.
        let release = "https://github.com/user/repo/releases/download/v1/a.mp3";
        assert_eq!(rewrite_github(release), release);
    }

    #[test]
    fn test_rewrite_sourceforge() {
        assert_eq!(
            rewrite_sourceforge("https://sourceforge.net/projects/x/files/a.mp3"),
            "https://sourceforge.net/projects/x/files/a.mp3/download"
        );
        assert_eq!(
            rewrite_sourceforge("https://sourceforge.net/projects/x/files/a.mp3/download"),
            "https://sourceforge.net/projects/x/files/a.mp3/download"
        );
    }

    #[test]
    fn test_looks_binary() {
        assert!(looks_binary(b"\x00\x01\x02garbage"));
        assert!(!looks_binary(b"<html><body>hello</body></html>"));
    }

    #[test]
    fn test_cache_roundtrip_and_expiry() {
        let resolver = LinkResolver::new(ResolverConfig {
            cache_ttl_days: 5,
            ..Default::default()
        })
        .unwrap();

        assert!(resolver.cache_lookup("https://x.example/share").is_none());
        resolver.cache_store(
            "https://x.example/share",
            "https://x.example/direct".to_string(),
            Service::Direct,
        );
        let hit = resolver.cache_lookup("https://x.example/share").unwrap();
        assert_eq!(hit.url, "https://x.example/direct");

        resolver.invalidate("https://x.example/share");
        assert!(resolver.cache_lookup("https://x.example/share").is_none());
    }

    #[test]
    fn test_cache_zero_ttl_expires_immediately() {
        let resolver = LinkResolver::new(ResolverConfig {
            cache_ttl_days: 0,
            ..Default::default()
        })
        .unwrap();
        resolver.cache_store(
            "https://x.example/share",
            "https://x.example/direct".to_string(),
            Service::Direct,
        );
        assert!(resolver.cache_lookup("https://x.example/share").is_none());
    }

    #[tokio::test]
    async fn test_resolve_malformed_url_is_typed_error() {
        let resolver = LinkResolver::with_defaults().unwrap();
        let err = resolver.resolve("definitely not a url").await.unwrap_err();
        assert_eq!(err.url, "definitely not a url");
        assert!(!err.attempts.is_empty());
    }
}
