//! Generic direct-link extraction from share-page HTML.
//!
//! Last-resort pass used when no service-specific strategy produced a
//! working URL. Patterns are tried in priority order: media tags first,
//! explicit download anchors, meta refreshes, then JSON-embedded fields.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;

lazy_static! {
    static ref MEDIA_SRC: Regex =
        Regex::new(r#"(?i)<(?:audio|video|source)[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref DOWNLOAD_ATTR_ANCHOR: Regex =
        Regex::new(r#"(?i)<a[^>]+download[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref HREF_THEN_DOWNLOAD_ATTR: Regex =
        Regex::new(r#"(?i)<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*\bdownload\b"#).unwrap();
    static ref DOWNLOAD_TEXT_ANCHOR: Regex =
        Regex::new(r#"(?i)<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*>[^<]*download[^<]*</a>"#)
            .unwrap();
    static ref META_REFRESH: Regex =
        Regex::new(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']refresh["'][^>]+url\s*=\s*([^"'>\s]+)"#)
            .unwrap();
    static ref JSON_URL_FIELD: Regex = Regex::new(
        r#""(?:downloadUrl|download_url|dlink|fileUrl|file|url)"\s*:\s*"((?:https?:)?\\?/\\?/[^"]+)""#
    )
    .unwrap();
}

/// Search `html` for a plausible direct link, in priority order. Relative
/// candidates are resolved against `base`.
pub fn extract_direct_link(html: &str, base: &Url) -> Option<String> {
    // Some "share pages" are bare JSON API responses; walk those properly
    // before falling back to the regex patterns.
    let trimmed = html.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(candidate) = json_document_link(html) {
            if let Some(absolute) = absolutize(&candidate, base) {
                return Some(absolute);
            }
        }
    }

    let patterns: [&Regex; 6] = [
        &MEDIA_SRC,
        &DOWNLOAD_ATTR_ANCHOR,
        &HREF_THEN_DOWNLOAD_ATTR,
        &DOWNLOAD_TEXT_ANCHOR,
        &META_REFRESH,
        &JSON_URL_FIELD,
    ];

    for pattern in patterns {
        if let Some(captures) = pattern.captures(html) {
            let raw = captures.get(1)?.as_str();
            if let Some(absolute) = absolutize(raw, base) {
                return Some(absolute);
            }
        }
    }
    None
}

fn json_document_link(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    find_url_field(&value)
}

/// Depth-first search for the first URL-bearing field under a known key.
fn find_url_field(value: &serde_json::Value) -> Option<String> {
    const URL_KEYS: [&str; 5] = ["downloadUrl", "download_url", "dlink", "fileUrl", "url"];
    match value {
        serde_json::Value::Object(map) => {
            for key in URL_KEYS {
                if let Some(serde_json::Value::String(s)) = map.get(key) {
                    if s.starts_with("http") {
                        return Some(s.clone());
                    }
                }
            }
            map.values().find_map(find_url_field)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_url_field),
        _ => None,
    }
}

/// Turn a scraped candidate into an absolute URL. JSON-escaped slashes are
/// unescaped first; fragments and javascript: pseudo-links are rejected.
fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let cleaned = raw.replace("\\/", "/");
    let trimmed = cleaned.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.to_lowercase().starts_with("javascript:")
    {
        return None;
    }
    base.join(trimmed).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://share.example.com/page/123").unwrap()
    }

    #[test]
    fn test_extracts_audio_source() {
        let html = r#"<html><audio controls src="https://cdn.example.com/a.mp3"></audio></html>"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://cdn.example.com/a.mp3".to_string())
        );
    }

    #[test]
    fn test_extracts_nested_source_tag() {
        let html = r#"<video><source src="/media/clip.mp4" type="video/mp4"></video>"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://share.example.com/media/clip.mp4".to_string())
        );
    }

    #[test]
    fn test_extracts_download_attribute_anchor() {
        let html = r#"<a download href="/files/track.mp3">get it</a>"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://share.example.com/files/track.mp3".to_string())
        );
    }

    #[test]
    fn test_extracts_download_text_anchor() {
        let html = r#"<a href="https://dl.example.com/f/9">Download file</a>"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://dl.example.com/f/9".to_string())
        );
    }

    #[test]
    fn test_extracts_meta_refresh() {
        let html =
            r#"<meta http-equiv="refresh" content="0; url=https://dl.example.com/f.mp3">"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://dl.example.com/f.mp3".to_string())
        );
    }

    #[test]
    fn test_extracts_json_embedded_url() {
        let html = r#"<script>var cfg = {"dlink":"https:\/\/dl.example.com\/x.flac"};</script>"#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://dl.example.com/x.flac".to_string())
        );
    }

    #[test]
    fn test_media_tag_beats_json_field() {
        let html = r#"
            <script>{"url":"https:\/\/json.example.com\/b.mp3"}</script>
            <audio src="https://cdn.example.com/a.mp3"></audio>
        "#;
        assert_eq!(
            extract_direct_link(html, &base()),
            Some("https://cdn.example.com/a.mp3".to_string())
        );
    }

    #[test]
    fn test_bare_json_response_is_walked() {
        let body = r#"{"status":"ok","data":{"file":{"name":"a.mp3","url":"https://dl.example.com/a.mp3"}}}"#;
        assert_eq!(
            extract_direct_link(body, &base()),
            Some("https://dl.example.com/a.mp3".to_string())
        );
    }

    #[test]
    fn test_json_walk_prefers_download_keys() {
        let body = r#"{"url":"https://page.example.com/view","downloadUrl":"https://dl.example.com/a.mp3"}"#;
        assert_eq!(
            extract_direct_link(body, &base()),
            Some("https://dl.example.com/a.mp3".to_string())
        );
    }

    #[test]
    fn test_rejects_junk_candidates() {
        assert_eq!(
            extract_direct_link(r##"<a download href="#">nope</a>"##, &base()),
            None
        );
        assert_eq!(
            extract_direct_link(r#"<a download href="javascript:void(0)">x</a>"#, &base()),
            None
        );
        assert_eq!(extract_direct_link("<p>no links here</p>", &base()), None);
    }
}
