//! Collection of renditions for one (or several, in principle) programs
//! (spec §3, §4.2-ish "StreamSet").
//!
//! The vector of renditions is append-only while live (new bitrates can show
//! up mid-stream); `RwLock` lets readers (the adaptation logic, the facade)
//! iterate by index concurrently with the rare append. Each rendition's own
//! mutable state is behind its own `Mutex`, so a long-running download never
//! blocks a concurrent read of an unrelated rendition (spec §5).

use std::sync::{Arc, Mutex, RwLock};

use crate::stream::Stream;

pub struct StreamSet {
    streams: RwLock<Vec<Arc<Mutex<Stream>>>>,
}

impl StreamSet {
    pub fn new(streams: Vec<Stream>) -> Self {
        Self {
            streams: RwLock::new(streams.into_iter().map(|s| Arc::new(Mutex::new(s))).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Arc<Mutex<Stream>>> {
        self.streams.read().unwrap().get(index).cloned()
    }

    /// A stable snapshot of the rendition handles, for code that needs to
    /// scan all of them (adaptation, playlist refresh) without holding the
    /// set lock while it does per-rendition work.
    pub fn snapshot(&self) -> Vec<Arc<Mutex<Stream>>> {
        self.streams.read().unwrap().clone()
    }

    pub fn push(&self, stream: Stream) {
        self.streams.write().unwrap().push(Arc::new(Mutex::new(stream)));
    }

    /// Index of the rendition matching `(program_id, bitrate_bps)`, if any.
    pub fn find_by_program_and_bitrate(&self, program_id: i32, bitrate_bps: u64) -> Option<usize> {
        self.streams
            .read()
            .unwrap()
            .iter()
            .position(|s| {
                let s = s.lock().unwrap();
                s.program_id == program_id && s.bitrate_bps == bitrate_bps
            })
    }

    /// Sort renditions by strictly decreasing bitrate (spec §3: "After open:
    /// sorted by decreasing bitrate").
    pub fn sort_by_bitrate_desc(&self) {
        self.streams
            .write()
            .unwrap()
            .sort_by(|a, b| {
                let a = a.lock().unwrap().bitrate_bps;
                let b = b.lock().unwrap().bitrate_bps;
                b.cmp(&a)
            });
    }

    /// Align every rendition's `start_sequence` to the maximum observed for
    /// its program, trim any leading segments before that point, and drop
    /// renditions left with zero segments (spec §3 invariant, spec §4.5
    /// step 4).
    pub fn sanitise(&self) {
        let streams = self.streams.read().unwrap().clone();

        let mut max_start_by_program: std::collections::HashMap<i32, i64> = std::collections::HashMap::new();
        for s in &streams {
            let s = s.lock().unwrap();
            if s.is_empty() {
                continue;
            }
            let entry = max_start_by_program.entry(s.program_id).or_insert(s.start_sequence);
            *entry = (*entry).max(s.start_sequence);
        }

        for s in &streams {
            let mut s = s.lock().unwrap();
            let Some(&target_start) = max_start_by_program.get(&s.program_id) else {
                continue;
            };
            while s.num_segments() > 0 {
                let first_id = s.get_segment(0).map(|seg| seg.sequence_id);
                match first_id {
                    Some(id) if id < target_start => {
                        s.remove_segment(0);
                    }
                    _ => break,
                }
            }
            s.start_sequence = target_start;
        }

        drop(streams);

        self.streams.write().unwrap().retain(|s| s.lock().unwrap().num_segments() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::url::HlsUrl;

    fn url(s: &str) -> HlsUrl {
        HlsUrl::parse(s).unwrap()
    }

    fn stream_with(program_id: i32, bitrate: u64, start: i64, count: i64) -> Stream {
        let mut s = Stream::new(program_id, bitrate, url("https://cdn.example.com/p.m3u8"), 10_000, true, false, start);
        for i in 0..count {
            s.append_segment(Segment::new(start + i, url("https://cdn.example.com/s.ts"), 10_000, None));
        }
        s
    }

    #[test]
    fn sanitise_aligns_start_sequence_and_drops_empty() {
        let set = StreamSet::new(vec![
            stream_with(1, 2_000_000, 10, 5),
            stream_with(1, 1_000_000, 12, 5),
            stream_with(1, 500_000, 20, 0),
        ]);

        set.sanitise();

        assert_eq!(set.len(), 2);
        for idx in 0..set.len() {
            let s = set.get(idx).unwrap();
            let s = s.lock().unwrap();
            assert_eq!(s.start_sequence, 12);
            assert_eq!(s.get_segment(0).unwrap().sequence_id, 12);
        }
    }

    #[test]
    fn sort_by_bitrate_desc() {
        let set = StreamSet::new(vec![
            stream_with(1, 500_000, 0, 1),
            stream_with(1, 2_000_000, 0, 1),
            stream_with(1, 1_000_000, 0, 1),
        ]);
        set.sort_by_bitrate_desc();

        let bitrates: Vec<u64> = set.snapshot().iter().map(|s| s.lock().unwrap().bitrate_bps).collect();
        assert_eq!(bitrates, vec![2_000_000, 1_000_000, 500_000]);
    }
}
