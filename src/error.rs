//! Error kinds surfaced across the read/seek boundary (spec §7).
//!
//! The teacher's own `common::errors::RustalinkError` is a serializable HTTP
//! response body, not a propagating error type, so it's not a fit here.
//! Instead this follows the `thiserror` convention already pulled in by the
//! teacher's `Cargo.toml` and used pervasively by the sibling `mesio-engine`
//! / `hls` / `flv` crates in the wider example pack.

/// `HlsError` is `Clone` so the sticky fatal-error flag on [`crate::buffer::HlsBuffer`]
/// can stash the terminal error and keep handing copies of it back to every
/// subsequent `read`/`seek` call (spec §7: "Once the fatal-error flag is set,
/// all reads and seeks return immediately").
#[derive(Debug, Clone, thiserror::Error)]
pub enum HlsError {
    /// Initial manifest does not parse as HLS.
    #[error("not an HLS stream: {0}")]
    NotHls(String),

    /// Initial manifest download failed.
    #[error("manifest fetch failed: {0}")]
    ManifestFetchFailed(String),

    /// `open` did not accumulate `MINBUFFER` segments within the prefetch
    /// attempt budget.
    #[error("prefetch timed out waiting for initial segments")]
    PrefetchTimeout,

    /// Six consecutive live-playlist refresh failures (spec §4.5, §8).
    #[error("playlist refresh failed {0} consecutive times")]
    PlaylistRefreshFailed(u32),

    /// A `Downloader` call failed during playback. Distinguished from
    /// `ManifestFetchFailed` because it is retried per spec §7 before giving
    /// up on the segment.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Caller-requested cancellation via `interrupt()`.
    #[error("interrupted")]
    Interrupted,
}

impl HlsError {
    /// `read` returns 0 and `seek` returns the current offset on this kind;
    /// everything else is a terminal, sticky error (spec §7).
    pub fn is_interrupted(&self) -> bool {
        matches!(self, HlsError::Interrupted)
    }
}

/// Sticky fatal-error flag shared between [`crate::buffer::HlsBuffer`] and
/// `PlaylistWorker` (spec §4.5, §7: "Once the fatal-error flag is set, all
/// reads and seeks return immediately"). Bundles the lock-free flag a hot
/// wait loop polls with the one terminal error handed back to every
/// subsequent `read`/`seek` call.
#[derive(Default)]
pub struct FatalFlag {
    set: std::sync::atomic::AtomicBool,
    error: std::sync::Mutex<Option<HlsError>>,
}

impl FatalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.set.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set(&self, err: HlsError) {
        *self.error.lock().unwrap() = Some(err);
        self.set.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn error(&self) -> Option<HlsError> {
        self.error.lock().unwrap().clone()
    }
}

impl From<reqwest::Error> for HlsError {
    fn from(e: reqwest::Error) -> Self {
        HlsError::IoError(e.to_string())
    }
}

impl From<HlsError> for std::io::Error {
    fn from(e: HlsError) -> Self {
        let kind = if e.is_interrupted() {
            std::io::ErrorKind::Interrupted
        } else {
            std::io::ErrorKind::Other
        };
        std::io::Error::new(kind, e.to_string())
    }
}
