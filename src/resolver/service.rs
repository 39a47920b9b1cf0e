//! Hosting-service detection.
//!
//! Ordered substring matching against the share URL; first match wins, and
//! anything unmatched is treated as a direct link.

use crate::catalog::Service;

/// Detection table, checked in order. Substrings are matched against the
/// lowercased URL.
const SERVICE_PATTERNS: &[(&str, Service)] = &[
    ("dropbox.com", Service::Dropbox),
    ("drive.google.com", Service::GoogleDrive),
    ("docs.google.com", Service::GoogleDrive),
    ("mediafire.com", Service::Mediafire),
    ("mega.nz", Service::Mega),
    ("mega.co.nz", Service::Mega),
    ("1drv.ms", Service::OneDrive),
    ("onedrive.live.com", Service::OneDrive),
    ("terabox.com", Service::Terabox),
    ("teraboxapp.com", Service::Terabox),
    ("1024tera.com", Service::Terabox),
    ("pixeldrain.com", Service::Pixeldrain),
    ("github.com", Service::GitHub),
    ("githubusercontent.com", Service::GitHub),
    ("sourceforge.net", Service::SourceForge),
];

pub fn detect_service(url: &str) -> Service {
    let lowered = url.to_lowercase();
    for (pattern, service) in SERVICE_PATTERNS {
        if lowered.contains(pattern) {
            return *service;
        }
    }
    Service::Direct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_known_services() {
        assert_eq!(
            detect_service("https://www.dropbox.com/s/abc/x.mp3?dl=0"),
            Service::Dropbox
        );
        assert_eq!(
            detect_service("https://drive.google.com/file/d/ABC123/view"),
            Service::GoogleDrive
        );
        assert_eq!(
            detect_service("https://www.mediafire.com/file/xyz/track.mp3/file"),
            Service::Mediafire
        );
        assert_eq!(detect_service("https://mega.nz/file/abc#key"), Service::Mega);
        assert_eq!(detect_service("https://1drv.ms/u/s!abc"), Service::OneDrive);
        assert_eq!(
            detect_service("https://terabox.com/s/1abc"),
            Service::Terabox
        );
        assert_eq!(
            detect_service("https://pixeldrain.com/u/abc123"),
            Service::Pixeldrain
        );
        assert_eq!(
            detect_service("https://github.com/user/repo/blob/main/song.mp3"),
            Service::GitHub
        );
        assert_eq!(
            detect_service("https://sourceforge.net/projects/x/files/song.mp3"),
            Service::SourceForge
        );
    }

    #[test]
    fn test_unmatched_urls_are_direct() {
        assert_eq!(
            detect_service("https://cdn.example.com/audio/track.mp3"),
            Service::Direct
        );
        assert_eq!(detect_service("not even a url"), Service::Direct);
    }

    #[test]
    fn test_detection_is_case_insensitive() {
        assert_eq!(
            detect_service("https://WWW.DROPBOX.COM/s/ABC/x.mp3"),
            Service::Dropbox
        );
    }

    #[test]
    fn test_first_match_wins() {
        // A dropbox link proxied through another host string still matches
        // the earlier table entry.
        assert_eq!(
            detect_service("https://www.dropbox.com/?redirect=mediafire.com"),
            Service::Dropbox
        );
    }
}
