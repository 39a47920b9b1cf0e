//! Eviction scoring.
//!
//! Pure functions over an immutable snapshot of (plays, skips, last play,
//! now); no I/O, no clock reads, so the policy is trivially unit-testable.

use crate::catalog::TrackRecord;
use chrono::{DateTime, Utc};

/// Days of recency that still earn a bonus.
const RECENCY_WINDOW_DAYS: i64 = 30;

/// Desirability score for keeping a track in the cache.
///
/// `plays - 2 * skips + recency_bonus`, where the bonus is
/// `max(0, 30 - days_since_last_played)` and zero for never-played tracks.
/// Lower scores are evicted first.
pub fn score(plays: u32, skips: u32, last_played_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let base = plays as i64 - 2 * skips as i64;
    base + recency_bonus(last_played_at, now)
}

fn recency_bonus(last_played_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match last_played_at {
        Some(last) => {
            let days = (now - last).num_days();
            (RECENCY_WINDOW_DAYS - days).clamp(0, RECENCY_WINDOW_DAYS)
        }
        None => 0,
    }
}

/// Order eviction candidates: ascending score, ties broken by oldest
/// `last_played_at` with never-played treated as oldest of all.
pub fn sort_eviction_candidates(tracks: &mut [TrackRecord], now: DateTime<Utc>) {
    tracks.sort_by(|a, b| {
        let score_a = score(a.plays, a.skips, a.last_played_at, now);
        let score_b = score(b.plays, b.skips, b.last_played_at, now);
        score_a
            .cmp(&score_b)
            .then_with(|| match (a.last_played_at, b.last_played_at) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(a_ts), Some(b_ts)) => a_ts.cmp(&b_ts),
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn track(plays: u32, skips: u32, played_days_ago: Option<i64>) -> TrackRecord {
        let mut t = TrackRecord::new(
            format!("t-{}-{}-{:?}", plays, skips, played_days_ago),
            "artist",
        );
        t.plays = plays;
        t.skips = skips;
        t.last_played_at = played_days_ago.map(|d| Utc::now() - Duration::days(d));
        t
    }

    #[test]
    fn test_score_formula_recent_play() {
        // plays=10, skips=1, played today: 10 - 2 + 30 = 38
        let now = Utc::now();
        assert_eq!(score(10, 1, Some(now), now), 38);
    }

    #[test]
    fn test_score_formula_stale_play() {
        // plays=10, skips=1, played 40 days ago: 10 - 2 + 0 = 8
        let now = Utc::now();
        assert_eq!(score(10, 1, Some(now - Duration::days(40)), now), 8);
    }

    #[test]
    fn test_score_never_played_gets_no_bonus() {
        let now = Utc::now();
        assert_eq!(score(5, 0, None, now), 5);
        assert_eq!(score(0, 0, None, now), 0);
    }

    #[test]
    fn test_score_can_go_negative() {
        let now = Utc::now();
        assert_eq!(score(1, 3, None, now), -5);
    }

    #[test]
    fn test_monotonic_in_plays() {
        let now = Utc::now();
        let played = Some(now - Duration::days(10));
        assert!(score(11, 2, played, now) >= score(10, 2, played, now));
        assert!(score(100, 2, played, now) > score(10, 2, played, now));
    }

    #[test]
    fn test_strictly_decreasing_in_skips() {
        let now = Utc::now();
        let played = Some(now - Duration::days(10));
        assert!(score(10, 3, played, now) < score(10, 2, played, now));
    }

    #[test]
    fn test_eviction_order_lowest_first() {
        let now = Utc::now();
        // Stale track scores 8, fresh one 38; the fresh one is evicted last.
        let mut tracks = vec![track(10, 1, Some(0)), track(10, 1, Some(40))];
        sort_eviction_candidates(&mut tracks, now);
        assert_eq!(tracks[0].last_played_at.is_some(), true);
        assert!(score(
            tracks[0].plays,
            tracks[0].skips,
            tracks[0].last_played_at,
            now
        ) < score(
            tracks[1].plays,
            tracks[1].skips,
            tracks[1].last_played_at,
            now
        ));
    }

    #[test]
    fn test_eviction_tie_break_oldest_play_first() {
        let now = Utc::now();
        // Same score (recency bonus exhausted for both): older play evicted first.
        let a = track(10, 0, Some(60));
        let b = track(10, 0, Some(90));
        let mut tracks = vec![a, b];
        sort_eviction_candidates(&mut tracks, now);
        assert_eq!(tracks[0].last_played_at, tracks.iter().map(|t| t.last_played_at).min().unwrap());
    }

    #[test]
    fn test_eviction_tie_break_never_played_is_oldest() {
        let now = Utc::now();
        let played = track(10, 0, Some(90));
        let never = track(10, 0, None);
        let never_id = never.id.clone();
        let mut tracks = vec![played, never];
        sort_eviction_candidates(&mut tracks, now);
        assert_eq!(tracks[0].id, never_id);
    }
}
