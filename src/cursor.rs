//! Playback cursor (spec §3): the one piece of state genuinely shared
//! between the reader thread and `StreamWorker`.
//!
//! `byte_offset` is written only by the reader and may be read without a
//! lock (spec §5); `segment_idx`/`stream_idx` are read-modify-written
//! together under one mutex since a seek changes both atomically.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

struct Position {
    /// Index into the current rendition's segment list (0-based from the
    /// program's common start sequence, spec §3).
    segment_idx: usize,
    /// Index of the rendition currently playing.
    stream_idx: usize,
}

pub struct PlaybackCursor {
    position: Mutex<Position>,
    byte_offset: AtomicU64,
}

impl PlaybackCursor {
    pub fn new(segment_idx: usize, stream_idx: usize) -> Self {
        Self {
            position: Mutex::new(Position { segment_idx, stream_idx }),
            byte_offset: AtomicU64::new(0),
        }
    }

    pub fn segment_idx(&self) -> usize {
        self.position.lock().unwrap().segment_idx
    }

    pub fn stream_idx(&self) -> usize {
        self.position.lock().unwrap().stream_idx
    }

    /// Advances to the next segment, unless a concurrent seek already moved
    /// the cursor elsewhere in which case the caller's stale read is simply
    /// dropped (spec §4.7 step 4: "Advance `play_idx`").
    pub fn advance_segment(&self) {
        self.position.lock().unwrap().segment_idx += 1;
    }

    /// Sets both fields atomically (used by `seek`, spec §4.8: "Commit").
    pub fn set_position(&self, segment_idx: usize, stream_idx: usize) {
        let mut pos = self.position.lock().unwrap();
        pos.segment_idx = segment_idx;
        pos.stream_idx = stream_idx;
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset.load(Ordering::Acquire)
    }

    pub fn set_byte_offset(&self, value: u64) {
        self.byte_offset.store(value, Ordering::Release);
    }

    pub fn add_bytes(&self, n: u64) {
        self.byte_offset.fetch_add(n, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_offset_monotonic_across_reads() {
        let cursor = PlaybackCursor::new(0, 0);
        cursor.add_bytes(100);
        cursor.add_bytes(50);
        assert_eq!(cursor.byte_offset(), 150);
    }

    #[test]
    fn seek_sets_both_fields_together() {
        let cursor = PlaybackCursor::new(0, 0);
        cursor.set_position(7, 1);
        assert_eq!(cursor.segment_idx(), 7);
        assert_eq!(cursor.stream_idx(), 1);
    }
}
