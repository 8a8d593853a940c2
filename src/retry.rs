//! Fixed backoff schedules and configuration constants (spec §4.4, §4.5, §6).
//!
//! Per spec §6 these are not configurable at the interface — they are
//! compiled-in constants, the way the teacher hard-codes `PREFETCH_SEGMENTS`
//! and `LOW_WATER_BYTES` in `audio::hls::mod` rather than threading them
//! through `Config`.

use std::time::Duration;

/// Number of segments `StreamWorker` keeps downloaded ahead of playback.
pub const READAHEAD: usize = 6;

/// Segments prefetched synchronously during `open` before it returns.
pub const MINBUFFER: usize = 2;

/// Consecutive live-playlist refresh failures before the fatal-error flag
/// is set.
pub const PLAYLIST_FAILURE: u32 = 6;

/// Prefetch attempt cap during `open` (each attempt waits one signal
/// timeout before rechecking).
pub const PREFETCH_ATTEMPTS: u32 = 20;

/// Per-wait timeout used by the reader's buffering waits and by the
/// prefetch-attempt loop.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Segment download retry backoff: immediate retry, then 500ms, then drop.
pub const SEGMENT_RETRY_DELAYS: [Duration; 2] = [Duration::ZERO, Duration::from_millis(500)];

/// Number of segments from the download head within which a starved reader
/// causes the playlist worker to retry immediately instead of backing off
/// (spec §4.5).
pub const STARVED_THRESHOLD_SEGMENTS: i64 = 3;

/// Live-seek veto threshold: reject a seek if filling the gap would take
/// longer than this many seconds at the average measured bandwidth
/// (spec §4.8).
pub const SEEK_VETO_SECONDS: f64 = 5.0;

/// Minimum playlist refresh wait, regardless of `target_duration` (spec §4.5).
pub const MIN_REFRESH_WAIT: Duration = Duration::from_millis(100);

/// `wait_factor` applied to `target_duration * stream_factor` based on the
/// playlist worker's consecutive failure count (spec §4.5).
pub fn wait_factor(consecutive_failures: u32) -> f64 {
    match consecutive_failures {
        0 => 0.5,
        1 => 1.0,
        _ => 2.0,
    }
}

/// `stream_factor` in the refresh wait formula: live streams refresh at
/// `target_duration`, VOD (already fully known, refresh is a formality)
/// waits twice as long.
pub fn stream_factor(live: bool) -> f64 {
    if live { 1.0 } else { 2.0 }
}

/// Compute `next_wait_ms` for the playlist worker (spec §4.5).
pub fn playlist_refresh_wait(
    target_duration_ms: i64,
    live: bool,
    consecutive_failures: u32,
) -> Duration {
    let ms = target_duration_ms as f64 * wait_factor(consecutive_failures) * stream_factor(live);
    Duration::from_millis(ms.max(MIN_REFRESH_WAIT.as_millis() as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_factor_ramps_with_failures() {
        assert_eq!(wait_factor(0), 0.5);
        assert_eq!(wait_factor(1), 1.0);
        assert_eq!(wait_factor(2), 2.0);
        assert_eq!(wait_factor(10), 2.0);
    }

    #[test]
    fn refresh_wait_respects_minimum() {
        let w = playlist_refresh_wait(10, true, 0);
        assert_eq!(w, MIN_REFRESH_WAIT);
    }

    #[test]
    fn refresh_wait_scales_with_target_duration() {
        let w = playlist_refresh_wait(6000, true, 0);
        assert_eq!(w, Duration::from_millis(3000));
        let w = playlist_refresh_wait(6000, false, 0);
        assert_eq!(w, Duration::from_millis(6000));
        let w = playlist_refresh_wait(6000, true, 2);
        assert_eq!(w, Duration::from_millis(12000));
    }
}
