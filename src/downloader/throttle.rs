//! Pacing math for rate-limited downloads.
//!
//! Pure: the download loop feeds in bytes written and elapsed wall-clock
//! time, and gets back how long to sleep to stay under the byte rate.

use std::time::Duration;

/// How long the writer should sleep after writing `bytes_written` total
/// bytes in `elapsed` time, to hold the rate at or below
/// `max_bytes_per_sec`. `None` means no sleep is needed. A cap of zero
/// disables throttling entirely.
pub fn throttle_delay(
    bytes_written: u64,
    elapsed: Duration,
    max_bytes_per_sec: u64,
) -> Option<Duration> {
    if max_bytes_per_sec == 0 {
        return None;
    }
    let expected = Duration::from_secs_f64(bytes_written as f64 / max_bytes_per_sec as f64);
    let delay = expected.checked_sub(elapsed)?;
    if delay.is_zero() {
        None
    } else {
        Some(delay)
    }
}
