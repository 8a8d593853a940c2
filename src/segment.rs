//! One media chunk's bytes plus its read cursor (spec §3, §4.1).
//!
//! Decryption, when the segment is keyed, happens eagerly at download
//! completion — see [`Segment::set_bytes`] — so [`Segment::read`] is always a
//! plain memcpy off already-plaintext bytes.

use crate::url::HlsUrl;

/// AES-128 key reference carried by a segment under `EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub key_url: HlsUrl,
    pub iv: [u8; 16],
}

/// One entry of a rendition's segment list.
///
/// `played <= size` always holds; [`Segment::read`] is the only way `played`
/// advances, and [`Segment::reset`] / [`Segment::clear`] are the only ways it
/// goes back to zero (spec §3 invariants).
#[derive(Debug, Clone)]
pub struct Segment {
    pub sequence_id: i64,
    pub url: HlsUrl,
    pub duration_ms: i64,
    pub key: Option<SegmentKey>,
    bytes: Vec<u8>,
    played: usize,
}

impl Segment {
    pub fn new(sequence_id: i64, url: HlsUrl, duration_ms: i64, key: Option<SegmentKey>) -> Self {
        Self {
            sequence_id,
            url,
            duration_ms,
            key,
            bytes: Vec::new(),
            played: 0,
        }
    }

    /// Total downloaded size. Zero until [`Segment::set_bytes`] is called.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn size_played(&self) -> usize {
        self.played
    }

    pub fn is_downloaded(&self) -> bool {
        !self.bytes.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.is_downloaded() && self.played >= self.bytes.len()
    }

    /// Installs freshly-downloaded (already-decrypted) bytes and resets the
    /// read cursor. Called by the downloader, never by the reader.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
        self.played = 0;
    }

    /// Copies `min(len, size - played)` bytes starting at `played` into
    /// `dst` (if provided) and advances `played` by that many. A `None`
    /// `dst` advances the cursor without copying, used by `seek`'s
    /// within-segment positioning (spec §4.8: `segment.read(NULL, skip)`).
    pub fn read(&mut self, dst: Option<&mut [u8]>, len: usize) -> usize {
        let remaining = self.bytes.len().saturating_sub(self.played);
        let n = remaining.min(len);
        if let Some(dst) = dst {
            dst[..n].copy_from_slice(&self.bytes[self.played..self.played + n]);
        }
        self.played += n;
        n
    }

    /// Rewinds the cursor for replay (VOD, cached rendition).
    pub fn reset(&mut self) {
        self.played = 0;
    }

    /// Frees the payload (live, or non-cached rendition).
    pub fn clear(&mut self) {
        self.bytes = Vec::new();
        self.played = 0;
    }

    /// `(id, duration, url)` equality used by `PlaylistWorker::update` to
    /// decide whether a re-fetched segment record changed (spec §4.5).
    pub fn same_identity(&self, other: &Segment) -> bool {
        self.sequence_id == other.sequence_id
            && self.duration_ms == other.duration_ms
            && self.url == other.url
    }
}
