//! One bitrate rendition: ordered segments plus the metadata a playlist
//! refresh updates in place (spec §3, §4.2).

use std::time::{Duration, Instant};

use crate::decryptor::Decryptor;
use crate::downloader::Downloader;
use crate::error::HlsError;
use crate::segment::Segment;
use crate::url::HlsUrl;

/// A rendition of one program at one bitrate.
///
/// Segments are mutated only while the [`std::sync::Mutex`] wrapping this
/// `Stream` (held by [`crate::stream_set::StreamSet`]) is locked; there are
/// no back-pointers to the owning set or program (spec §9: arena + indices,
/// not a cyclic pointer graph).
#[derive(Debug)]
pub struct Stream {
    pub program_id: i32,
    pub bitrate_bps: u64,
    pub url: HlsUrl,
    pub target_duration_ms: i64,
    pub live: bool,
    pub cache: bool,
    pub start_sequence: i64,
    segments: Vec<Segment>,
}

impl Stream {
    pub fn new(
        program_id: i32,
        bitrate_bps: u64,
        url: HlsUrl,
        target_duration_ms: i64,
        live: bool,
        cache: bool,
        start_sequence: i64,
    ) -> Self {
        Self {
            program_id,
            bitrate_bps,
            url,
            target_duration_ms,
            live,
            cache,
            start_sequence,
            segments: Vec::new(),
        }
    }

    pub fn append_segment(&mut self, segment: Segment) {
        if let Some(last) = self.segments.last() {
            if segment.sequence_id != last.sequence_id + 1 {
                tracing::warn!(
                    program_id = self.program_id,
                    bitrate_bps = self.bitrate_bps,
                    expected = last.sequence_id + 1,
                    got = segment.sequence_id,
                    "sequence gap appending segment"
                );
            }
        }
        self.segments.push(segment);
    }

    /// Index of the segment with this sequence id, by binary search (the
    /// list is monotonic, spec invariant 1).
    pub fn find_segment(&self, sequence_id: i64) -> Option<usize> {
        self.segments
            .binary_search_by_key(&sequence_id, |s| s.sequence_id)
            .ok()
    }

    pub fn get_segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn get_segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    pub fn remove_segment(&mut self, index: usize) -> Option<Segment> {
        if index < self.segments.len() {
            Some(self.segments.remove(index))
        } else {
            None
        }
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of every segment's duration.
    pub fn duration_ms(&self) -> i64 {
        self.segments.iter().map(|s| s.duration_ms).sum()
    }

    /// Copies refreshed metadata from `other` (a freshly re-parsed rendition
    /// of the same program+bitrate) without touching `self.segments` — the
    /// segment list is merged separately by
    /// [`crate::worker::playlist_worker::merge_rendition`].
    pub fn update_with(&mut self, other: &Stream) {
        self.url = other.url.clone();
        self.target_duration_ms = other.target_duration_ms;
        self.live = other.live;
        self.cache = other.cache;
    }

    /// Request for the out-of-lock download step: the URL and key material
    /// needed to fetch and decrypt segment `index`. Kept separate from the
    /// actual fetch so the caller can drop the stream's lock before doing
    /// network I/O (spec §4.2: "holds no stream-wide lock while the HTTP I/O
    /// is in flight").
    pub fn segment_download_request(&self, index: usize) -> Result<SegmentDownloadRequest, HlsError> {
        let segment = self
            .segments
            .get(index)
            .ok_or_else(|| HlsError::IoError(format!("no segment at index {index}")))?;
        Ok(SegmentDownloadRequest {
            url: segment.url.clone(),
            key: segment.key.clone(),
        })
    }

    /// Installs the bytes fetched for `index` (called after re-acquiring the
    /// lock following `segment_download_request` + out-of-lock fetch).
    pub fn apply_segment_bytes(&mut self, index: usize, bytes: Vec<u8>) {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.set_bytes(bytes);
        }
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Drains the segment list, for `PlaylistWorker::update` which consumes
    /// a freshly-parsed rendition's segments one by one (spec §4.5).
    pub fn take_segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.segments)
    }

    /// Overwrites an existing segment's identity fields from a re-fetched
    /// record and drops any already-downloaded bytes, since the content at
    /// that URL may have changed (spec §4.5: "content is refetched on next
    /// read").
    pub fn overwrite_segment(&mut self, index: usize, fresh: Segment) {
        if let Some(slot) = self.segments.get_mut(index) {
            *slot = fresh;
        }
    }
}

pub struct SegmentDownloadRequest {
    pub url: HlsUrl,
    pub key: Option<crate::segment::SegmentKey>,
}

/// Fetches (and decrypts, if keyed) one segment's bytes. Does not touch any
/// `Stream`; the caller installs the result via
/// [`Stream::apply_segment_bytes`] under lock.
///
/// Returns the bytes plus the measured bandwidth in bits/second, used by
/// `StreamWorker`'s running bandwidth average (spec §4.4).
pub fn download_segment(
    request: &SegmentDownloadRequest,
    downloader: &dyn Downloader,
    decryptor: Option<&dyn Decryptor>,
) -> Result<(Vec<u8>, u64), HlsError> {
    let start = Instant::now();
    let mut bytes = downloader.get(&request.url)?.to_vec();
    let elapsed = start.elapsed();

    if let Some(key) = &request.key {
        let decryptor = decryptor
            .ok_or_else(|| HlsError::IoError(format!("segment at {} is keyed but no decryptor was configured", request.url)))?;
        decryptor.decrypt(&key.key_url, key.iv, &mut bytes)?;
    }

    let bandwidth_bps = bandwidth_bits_per_second(bytes.len(), elapsed);
    Ok((bytes, bandwidth_bps))
}

fn bandwidth_bits_per_second(bytes: usize, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64().max(0.001);
    ((bytes as f64 * 8.0) / secs) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ByteRange;
    use bytes::Bytes;

    fn url(s: &str) -> HlsUrl {
        HlsUrl::parse(s).unwrap()
    }

    fn seg(id: i64) -> Segment {
        Segment::new(id, url("https://cdn.example.com/s.ts"), 10_000, None)
    }

    #[test]
    fn append_and_find_by_sequence() {
        let mut stream = Stream::new(1, 1_000_000, url("https://cdn.example.com/p.m3u8"), 10_000, false, true, 5);
        stream.append_segment(seg(5));
        stream.append_segment(seg(6));
        stream.append_segment(seg(7));

        assert_eq!(stream.find_segment(6), Some(1));
        assert_eq!(stream.find_segment(99), None);
        assert_eq!(stream.num_segments(), 3);
        assert_eq!(stream.duration_ms(), 30_000);
    }

    #[test]
    fn update_with_copies_metadata_not_segments() {
        let mut a = Stream::new(1, 1_000_000, url("https://cdn.example.com/a.m3u8"), 10_000, true, false, 0);
        a.append_segment(seg(0));
        let b = Stream::new(1, 1_000_000, url("https://cdn.example.com/b.m3u8"), 12_000, false, false, 0);

        a.update_with(&b);
        assert_eq!(a.url, b.url);
        assert_eq!(a.target_duration_ms, 12_000);
        assert!(!a.live);
        assert_eq!(a.num_segments(), 1);
    }

    struct FixedDownloader(Vec<u8>);
    impl Downloader for FixedDownloader {
        fn get(&self, _url: &HlsUrl) -> Result<Bytes, HlsError> {
            Ok(Bytes::from(self.0.clone()))
        }
        fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
            unreachable!()
        }
    }

    #[test]
    fn download_segment_measures_bandwidth() {
        let mut stream = Stream::new(1, 1_000_000, url("https://cdn.example.com/p.m3u8"), 10_000, false, true, 0);
        stream.append_segment(seg(0));

        let req = stream.segment_download_request(0).unwrap();
        let downloader = FixedDownloader(vec![0u8; 1_000]);
        let (bytes, bandwidth) = download_segment(&req, &downloader, None).unwrap();
        assert_eq!(bytes.len(), 1_000);
        assert!(bandwidth > 0);

        stream.apply_segment_bytes(0, bytes);
        assert_eq!(stream.get_segment(0).unwrap().size(), 1_000);
    }
}
