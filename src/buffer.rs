//! `HlsBuffer` (spec §4.6): the public open/read/seek/close surface that
//! orchestrates the two workers and presents a seekable "file" to a
//! demuxer. Mirrors how the teacher's own `audio::hls::HlsReader` is a
//! single struct fronting a background thread, generalized here to a pair
//! of workers plus multi-rendition adaptation.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use symphonia::core::io::MediaSource;

use crate::cursor::PlaybackCursor;
use crate::decryptor::Decryptor;
use crate::downloader::Downloader;
use crate::error::{FatalFlag, HlsError};
use crate::parser::{ParsedPlaylist, ParserAdapter};
use crate::retry::{MINBUFFER, PREFETCH_ATTEMPTS, SEEK_VETO_SECONDS, WAIT_TIMEOUT};
use crate::stream::Stream;
use crate::stream_set::StreamSet;
use crate::url::HlsUrl;
use crate::worker::playlist_worker::PlaylistWorker;
use crate::worker::stream_worker::StreamWorker;

/// POSIX-style whence for [`HlsBuffer::seek`] (spec §4.8, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

pub struct HlsBuffer {
    stream_set: Arc<StreamSet>,
    cursor: Arc<PlaybackCursor>,
    stream_worker: Option<StreamWorker>,
    playlist_worker: Option<PlaylistWorker>,
    interrupted: Arc<AtomicBool>,
    /// Set by `PlaylistWorker` once it gives up after `PLAYLIST_FAILURE`
    /// consecutive refresh failures (spec §4.5, §7: "Once the fatal-error
    /// flag is set, all reads and seeks return immediately").
    fatal: Arc<FatalFlag>,
    /// Set by `seek` when the chosen segment is the last one; suppresses
    /// the pre-read buffering wait for a "next" segment that doesn't exist
    /// (spec §9 open question: the source suppresses it, this follows).
    seek_to_end: AtomicBool,
}

impl HlsBuffer {
    pub fn open(
        url: &str,
        downloader: Arc<dyn Downloader>,
        decryptor: Option<Arc<dyn Decryptor>>,
    ) -> Result<Self, HlsError> {
        Self::open_with_interrupt(url, downloader, decryptor, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`HlsBuffer::open`], but takes an externally-owned interrupt
    /// flag instead of creating a fresh one. A caller can clone `interrupted`
    /// before calling this and set it from another thread to cancel `open`
    /// itself — including mid-prefetch (spec §8 scenario S6) — since
    /// `HlsBuffer::interrupt` only exists once `open` has already returned.
    pub fn open_with_interrupt(
        url: &str,
        downloader: Arc<dyn Downloader>,
        decryptor: Option<Arc<dyn Decryptor>>,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self, HlsError> {
        if interrupted.load(Ordering::Acquire) {
            return Err(HlsError::Interrupted);
        }

        let parser = ParserAdapter::new();
        let root_url = HlsUrl::parse(url)?;

        let manifest_bytes = downloader
            .get(&root_url)
            .map_err(|e| HlsError::ManifestFetchFailed(e.to_string()))?;

        if !crate::parser::is_http_live_streaming(&manifest_bytes, &root_url) {
            return Err(HlsError::NotHls(url.to_string()));
        }

        let (streams, master_url) = match parser.parse(&manifest_bytes, &root_url, 0)? {
            ParsedPlaylist::Master { variants } => {
                let mut streams = Vec::with_capacity(variants.len());
                for variant in &variants {
                    let bytes = downloader
                        .get(&variant.url)
                        .map_err(|e| HlsError::ManifestFetchFailed(e.to_string()))?;
                    match parser.parse(&bytes, &variant.url, variant.bitrate_bps)? {
                        ParsedPlaylist::Media { stream, .. } => streams.push(stream),
                        ParsedPlaylist::Master { .. } => {
                            return Err(HlsError::NotHls(format!("{} is itself a master playlist", variant.url)));
                        }
                    }
                }
                (streams, Some(root_url.clone()))
            }
            ParsedPlaylist::Media { stream, .. } => (vec![stream], None),
        };

        if streams.is_empty() || streams.iter().all(|s| s.is_empty()) {
            return Err(HlsError::ManifestFetchFailed(format!("{url} has no segments")));
        }

        let adaptive = streams.len() > 1;
        let stream_set = Arc::new(StreamSet::new(streams));
        stream_set.sanitise();
        stream_set.sort_by_bitrate_desc();

        let first = stream_set
            .get(0)
            .ok_or_else(|| HlsError::ManifestFetchFailed(format!("{url} has no renditions after sanitise")))?;
        let (live, start_idx) = {
            let s = first.lock().unwrap();
            let start_idx = if s.live { choose_live_start(&s) } else { 0 };
            (s.live, start_idx)
        };

        let cursor = Arc::new(PlaybackCursor::new(start_idx, 0));

        let stream_worker = StreamWorker::spawn(
            Arc::clone(&stream_set),
            Arc::clone(&cursor),
            Arc::clone(&downloader),
            decryptor.clone(),
            adaptive,
            0,
            start_idx,
        );

        let fatal = Arc::new(FatalFlag::new());

        let total_segments = first.lock().unwrap().num_segments();
        let prefetch_target = start_idx + MINBUFFER.min(total_segments.saturating_sub(start_idx));
        if !wait_for_prefetch(&stream_worker, &interrupted, start_idx, prefetch_target) {
            stream_worker.interrupt();
            stream_worker.join();
            let err = if interrupted.load(Ordering::Acquire) {
                HlsError::Interrupted
            } else {
                HlsError::PrefetchTimeout
            };
            fatal.set(err.clone());
            return Err(err);
        }

        // A directly-fetched media playlist (no master) carries no
        // BANDWIDTH attribute; estimate it from the first prefetched
        // segment so `size_media`/`seek` have a usable bitrate.
        {
            let mut s = first.lock().unwrap();
            if s.bitrate_bps == 0 {
                if let Some(estimate) = estimate_bitrate_bps(&s) {
                    s.bitrate_bps = estimate;
                }
            }
        }

        let playlist_worker = if live {
            Some(PlaylistWorker::spawn(
                Arc::clone(&stream_set),
                Arc::clone(&cursor),
                Arc::clone(&downloader),
                Arc::new(ParserAdapter::new()),
                master_url,
                stream_worker.shared(),
                Arc::clone(&fatal),
                Duration::ZERO,
            ))
        } else {
            None
        };

        Ok(Self {
            stream_set,
            cursor,
            stream_worker: Some(stream_worker),
            playlist_worker,
            interrupted,
            fatal,
            seek_to_end: AtomicBool::new(false),
        })
    }

    pub fn is_open(&self) -> bool {
        !self.fatal.is_set()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        if let Some(w) = &self.stream_worker {
            w.wake();
        }
        if let Some(w) = &self.playlist_worker {
            w.wake();
        }
    }

    pub fn continue_(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    /// Bytes delivered, total duration x bitrate / 8 for the rendition
    /// currently feeding playback (spec §4.6, invariant 6).
    pub fn size_media(&self) -> i64 {
        let Some(stream) = self.stream_set.get(self.cursor.stream_idx()) else {
            return 0;
        };
        let s = stream.lock().unwrap();
        s.duration_ms() * s.bitrate_bps as i64 / 8_000
    }

    pub fn read_position(&self) -> u64 {
        self.cursor.byte_offset()
    }

    /// Segment count of the rendition currently feeding playback — not
    /// necessarily rendition 0, since bitrate adaptation may have moved
    /// `cursor.stream_idx()` elsewhere.
    fn total_segments(&self) -> usize {
        self.stream_set
            .get(self.cursor.stream_idx())
            .map(|s| s.lock().unwrap().num_segments())
            .unwrap_or(0)
    }

    /// Blocks (in bounded slices) until the current and next segment are
    /// both downloaded, or end-of-media, or interrupted/fatal (spec §4.7
    /// step 1). Returns `false` if the caller should stop reading.
    fn wait_until_buffered(&self) -> bool {
        if self.seek_to_end.load(Ordering::Acquire) {
            return true;
        }
        let Some(worker) = &self.stream_worker else { return false };
        loop {
            if self.fatal.is_set() || self.interrupted.load(Ordering::Acquire) {
                return false;
            }
            let play_idx = self.cursor.segment_idx();
            let total = self.total_segments();
            if play_idx >= total {
                return true;
            }
            let current_ready = worker.is_downloaded(play_idx).is_some();
            // A segment the download head has already passed without
            // populating `segmap` was dropped after exhausting retries
            // (spec §4.7 step 3); it will never become "ready", so don't
            // wait on it — let the read loop's skip branch advance past it.
            let current_dropped = !current_ready && worker.dl_segment_idx() > play_idx;
            let next_ready = play_idx + 1 >= total || worker.is_downloaded(play_idx + 1).is_some();
            if (current_ready || current_dropped) && next_ready {
                return true;
            }

            let shared = worker.shared();
            let guard = shared.0.lock().unwrap();
            let _ = shared.1.wait_timeout(guard, WAIT_TIMEOUT).unwrap();
        }
    }

    /// Reads up to `dst.len()` bytes (spec §4.7). Returns 0 only at
    /// end-of-media or when interrupted before any byte is produced.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, HlsError> {
        if self.fatal.is_set() {
            return Err(self.fatal.error().unwrap_or(HlsError::IoError("buffer closed".into())));
        }

        let mut used = 0usize;
        while used < dst.len() {
            if self.interrupted.load(Ordering::Acquire) {
                break;
            }
            if !self.wait_until_buffered() {
                break;
            }

            let play_idx = self.cursor.segment_idx();
            let total = self.total_segments();
            if play_idx >= total {
                break;
            }

            let Some(worker) = &self.stream_worker else { break };
            let Some(supplying_idx) = worker.is_downloaded(play_idx) else {
                // Segment was dropped after exhausting retries; skip it.
                self.cursor.advance_segment();
                worker.wake();
                continue;
            };

            let Some(stream_arc) = self.stream_set.get(supplying_idx) else {
                self.cursor.advance_segment();
                continue;
            };

            self.cursor.set_position(play_idx, supplying_idx);

            let mut stream = stream_arc.lock().unwrap();
            let live_or_noncache = !stream.cache || stream.live;
            let Some(segment) = stream.get_segment_mut(play_idx) else {
                drop(stream);
                self.cursor.advance_segment();
                continue;
            };

            if segment.is_downloaded() && segment.size_played() >= segment.size() {
                if live_or_noncache {
                    segment.clear();
                } else {
                    segment.reset();
                }
                drop(stream);
                if live_or_noncache {
                    worker.clear_downloaded(play_idx);
                }
                self.cursor.advance_segment();
                worker.wake();
                continue;
            }

            let n = segment.read(Some(&mut dst[used..]), dst.len() - used);
            drop(stream);
            used += n;
            if n == 0 {
                // Downloaded-but-empty segment (zero-byte fetch); avoid a
                // busy loop and move on.
                self.cursor.advance_segment();
                worker.wake();
            }
        }

        self.cursor.add_bytes(used as u64);
        Ok(used)
    }

    /// Waits until the chosen segment and one ahead are buffered, bounded
    /// by interrupt/fatal (spec §4.8 "Wait until ...").
    fn wait_after_seek(&self) {
        let Some(worker) = &self.stream_worker else { return };
        loop {
            if self.fatal.is_set() || self.interrupted.load(Ordering::Acquire) {
                return;
            }
            let play_idx = self.cursor.segment_idx();
            let total = self.total_segments();
            if play_idx >= total {
                return;
            }
            let buffered_ahead = (0..2).all(|k| {
                let idx = play_idx + k;
                idx >= total || worker.is_downloaded(idx).is_some()
            });
            if buffered_ahead {
                return;
            }
            let shared = worker.shared();
            let guard = shared.0.lock().unwrap();
            let _ = shared.1.wait_timeout(guard, WAIT_TIMEOUT).unwrap();
        }
    }

    /// Seeks to a byte offset (spec §4.8). Returns the new absolute offset;
    /// a vetoed live seek returns the unchanged current offset.
    pub fn seek(&self, pos: i64, whence: SeekWhence) -> Result<u64, HlsError> {
        if self.fatal.is_set() {
            return Err(self.fatal.error().unwrap_or(HlsError::IoError("buffer closed".into())));
        }

        let size_media = self.size_media();
        let current = self.cursor.byte_offset() as i64;
        let target = match whence {
            SeekWhence::Set => pos,
            SeekWhence::Cur => current + pos,
            SeekWhence::End => size_media - pos,
        };

        let Some(stream_arc) = self.stream_set.get(self.cursor.stream_idx()) else {
            return Ok(self.cursor.byte_offset());
        };

        let (bitrate_bps, target_duration_ms, live) = {
            let s = stream_arc.lock().unwrap();
            (s.bitrate_bps.max(1), s.target_duration_ms, s.live)
        };

        let mut post_time_ms = target * 8_000 / bitrate_bps as i64;
        if target > size_media {
            post_time_ms -= 3 * target_duration_ms;
        }
        post_time_ms = post_time_ms.max(0);

        let total = { stream_arc.lock().unwrap().num_segments() };
        let (chosen, start_time_ms) = map_time_to_segment(&stream_arc, post_time_ms);

        if live {
            let play_idx = self.cursor.segment_idx();
            let out_of_safe_range = chosen >= total || chosen < play_idx;
            let avg_bandwidth_bps = self.stream_worker.as_ref().map(|w| w.avg_bandwidth_bps()).unwrap_or(0);
            let fill_seconds = if avg_bandwidth_bps > 0 {
                (target_duration_ms as f64 / 1_000.0) * bitrate_bps as f64 / avg_bandwidth_bps as f64
            } else {
                f64::INFINITY
            };
            if out_of_safe_range && fill_seconds > SEEK_VETO_SECONDS {
                return Ok(self.cursor.byte_offset());
            }
        }

        let seek_to_end = chosen + 1 >= total;
        self.seek_to_end.store(seek_to_end, Ordering::Release);
        self.cursor.set_position(chosen, self.cursor.stream_idx());
        if let Some(worker) = &self.stream_worker {
            worker.seek(chosen);
        }

        let new_byte_offset = (post_time_ms * bitrate_bps as i64 / 8_000).max(0) as u64;
        self.cursor.set_byte_offset(new_byte_offset);

        self.wait_after_seek();

        // Within-segment positioning (spec §4.8) happens only after the
        // chosen segment has had a chance to be downloaded — doing it
        // earlier would silently drop the skip whenever the segment hadn't
        // been prefetched yet (`size() == 0`), since the byte offset within
        // an as-yet-undownloaded segment isn't known until its bytes arrive.
        {
            let mut s = stream_arc.lock().unwrap();
            if let Some(segment) = s.get_segment_mut(chosen) {
                let skip = if segment.size() > 0 {
                    let duration_ms = segment.duration_ms.max(1);
                    (((post_time_ms - start_time_ms) * segment.size() as i64) / duration_ms).max(0) as usize
                } else {
                    0
                };
                segment.read(None, skip);
            }
        }

        Ok(self.cursor.byte_offset())
    }

    /// Concatenates the raw downloaded bytes of segments `[seg_start,
    /// seg_end)` of the currently-playing rendition to `path`, for
    /// debugging (spec §6). Not part of playback.
    pub fn save_to_disk(&self, path: &Path, seg_start: usize, seg_end: usize) -> bool {
        use std::io::Write;

        let Some(stream_arc) = self.stream_set.get(self.cursor.stream_idx()) else {
            return false;
        };

        let mut file = match std::fs::File::create(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(?path, error = %e, "save_to_disk: failed to create file");
                return false;
            }
        };

        let stream = stream_arc.lock().unwrap();
        for idx in seg_start..seg_end {
            let Some(segment) = stream.get_segment(idx) else { break };
            // We need the raw bytes irrespective of what's already been
            // played; re-borrow via the public read-cursor API would
            // consume it, so this walks the segment's bytes directly
            // through a throwaway copy of the cursor state.
            let mut copy = segment.clone();
            let mut buf = vec![0u8; copy.size()];
            copy.read(Some(&mut buf), buf.len());
            if let Err(e) = file.write_all(&buf) {
                tracing::warn!(?path, segment = idx, error = %e, "save_to_disk: write failed");
                return false;
            }
        }

        true
    }

    /// Cancels `PlaylistWorker` first, then `StreamWorker`, joining both
    /// (spec §4.6: cancellation order matters — a playlist refresh can wake
    /// the stream worker, so reversing the order risks enqueuing work into
    /// an already-joined worker).
    pub fn close(mut self) {
        self.interrupted.store(true, Ordering::Release);
        if let Some(playlist_worker) = self.playlist_worker.take() {
            playlist_worker.interrupt();
            playlist_worker.join();
        }
        if let Some(stream_worker) = self.stream_worker.take() {
            stream_worker.interrupt();
            stream_worker.join();
        }
    }
}

impl Drop for HlsBuffer {
    fn drop(&mut self) {
        self.interrupted.store(true, Ordering::Release);
        if let Some(playlist_worker) = self.playlist_worker.take() {
            playlist_worker.interrupt();
            playlist_worker.join();
        }
        if let Some(stream_worker) = self.stream_worker.take() {
            stream_worker.interrupt();
            stream_worker.join();
        }
    }
}

impl Read for HlsBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        HlsBuffer::read(self, buf).map_err(io::Error::from)
    }
}

impl Seek for HlsBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (whence, offset) = match pos {
            SeekFrom::Start(p) => (SeekWhence::Set, p as i64),
            SeekFrom::Current(p) => (SeekWhence::Cur, p),
            SeekFrom::End(p) => (SeekWhence::End, -p),
        };
        HlsBuffer::seek(self, offset, whence).map_err(io::Error::from)
    }
}

impl MediaSource for HlsBuffer {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.size_media().max(0) as u64)
    }
}

fn wait_for_prefetch(worker: &StreamWorker, interrupted: &AtomicBool, start_idx: usize, target_idx: usize) -> bool {
    for _ in 0..PREFETCH_ATTEMPTS {
        if interrupted.load(Ordering::Acquire) {
            return false;
        }
        if (start_idx..target_idx).all(|i| worker.is_downloaded(i).is_some()) {
            return true;
        }
        let shared = worker.shared();
        let guard = shared.0.lock().unwrap();
        let _ = shared.1.wait_timeout(guard, WAIT_TIMEOUT).unwrap();
    }
    (start_idx..target_idx).all(|i| worker.is_downloaded(i).is_some())
}

/// First segment, walking backward from the end, whose cumulative duration
/// exceeds `3 x target_duration` (spec §4.6: "the first segment whose
/// cumulative duration from the end exceeds 3 x target_duration").
fn choose_live_start(stream: &Stream) -> usize {
    let threshold_ms = 3 * stream.target_duration_ms;
    let n = stream.num_segments();
    if n == 0 {
        return 0;
    }
    let mut acc = 0i64;
    for i in (0..n).rev() {
        acc += stream.get_segment(i).map(|s| s.duration_ms).unwrap_or(0);
        if acc > threshold_ms {
            return i;
        }
    }
    0
}

/// Maps a cumulative-duration offset to `(segment_index, start_time_ms)`
/// (spec §4.8 "Map time -> segment").
fn map_time_to_segment(stream_arc: &Arc<Mutex<Stream>>, post_time_ms: i64) -> (usize, i64) {
    let stream = stream_arc.lock().unwrap();
    let mut acc = 0i64;
    for i in 0..stream.num_segments() {
        let dur = stream.get_segment(i).map(|s| s.duration_ms).unwrap_or(0);
        if acc + dur > post_time_ms {
            return (i, acc);
        }
        acc += dur;
    }
    let last = stream.num_segments().saturating_sub(1);
    let last_dur = stream.get_segment(last).map(|s| s.duration_ms).unwrap_or(0);
    (last, acc - last_dur)
}

fn estimate_bitrate_bps(stream: &Stream) -> Option<u64> {
    let segment = stream.get_segment(0)?;
    if segment.duration_ms <= 0 || segment.size() == 0 {
        return None;
    }
    Some(segment.size() as u64 * 8_000 / segment.duration_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ByteRange;
    use crate::segment::Segment;
    use bytes::Bytes;

    fn url(s: &str) -> HlsUrl {
        HlsUrl::parse(s).unwrap()
    }

    fn vod_manifest(segment_count: usize) -> String {
        let mut m = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for i in 0..segment_count {
            m.push_str("#EXTINF:10.0,\n");
            m.push_str(&format!("seg{i}.ts\n"));
        }
        m.push_str("#EXT-X-ENDLIST\n");
        m
    }

    struct FakeDownloader {
        manifest: String,
        segment_size: usize,
    }

    impl Downloader for FakeDownloader {
        fn get(&self, url: &HlsUrl) -> Result<Bytes, HlsError> {
            if url.as_str().ends_with(".m3u8") {
                Ok(Bytes::from(self.manifest.clone()))
            } else {
                Ok(Bytes::from(vec![0xABu8; self.segment_size]))
            }
        }
        fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
            unreachable!()
        }
    }

    fn open_vod(segment_count: usize, segment_size: usize) -> HlsBuffer {
        let downloader: Arc<dyn Downloader> = Arc::new(FakeDownloader {
            manifest: vod_manifest(segment_count),
            segment_size,
        });
        HlsBuffer::open("https://cdn.example.com/live/index.m3u8", downloader, None).unwrap()
    }

    #[test]
    fn s1_vod_open_read_all() {
        let buffer = open_vod(3, 1_250_000);
        let mut total = Vec::new();
        let mut chunk = [0u8; 65_536];
        loop {
            let n = buffer.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            total.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(total.len(), 3_750_000);
        assert_eq!(buffer.read_position(), 3_750_000);
        assert_eq!(buffer.size_media(), 3_750_000);
    }

    #[test]
    fn s2_seek_forward_vod() {
        let buffer = open_vod(3, 1_250_000);
        let new_pos = buffer.seek(2_000_000, SeekWhence::Set).unwrap();
        assert_eq!(new_pos, 2_000_000);

        let mut chunk = [0u8; 16];
        let n = buffer.read(&mut chunk).unwrap();
        assert!(n > 0);
        // Segment 1's bytes are all 0xAB regardless of offset; the
        // meaningful assertion is the byte offset bookkeeping above.
    }

    /// A downloader that always fails one specific segment URL and succeeds
    /// for the manifest and every other segment — drives a real
    /// `HlsBuffer::read` through a permanently-dropped segment index.
    /// `stream_worker::tests::s5_segment_download_failure_is_dropped_after_retries`
    /// only asserts on `segmap`; this exercises the consuming side (spec §4.7
    /// step 3) so a reader stuck waiting on a dropped segment's `segmap`
    /// entry would hang this test instead of passing silently.
    struct FailsOneUrlDownloader {
        manifest: String,
        fail_url: String,
        segment_size: usize,
    }

    impl Downloader for FailsOneUrlDownloader {
        fn get(&self, url: &HlsUrl) -> Result<Bytes, HlsError> {
            if url.as_str().ends_with(".m3u8") {
                Ok(Bytes::from(self.manifest.clone()))
            } else if url.as_str() == self.fail_url {
                Err(HlsError::IoError("simulated network failure".into()))
            } else {
                Ok(Bytes::from(vec![0xABu8; self.segment_size]))
            }
        }
        fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
            unreachable!()
        }
    }

    #[test]
    fn s5_read_skips_dropped_segment_without_hanging() {
        let segment_size = 1_250_000;
        let downloader: Arc<dyn Downloader> = Arc::new(FailsOneUrlDownloader {
            manifest: vod_manifest(5),
            fail_url: "https://cdn.example.com/live/seg3.ts".into(),
            segment_size,
        });
        let buffer = HlsBuffer::open("https://cdn.example.com/live/index.m3u8", downloader, None).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut total = 0usize;
            let mut chunk = [0u8; 65_536];
            loop {
                match buffer.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(_) => break,
                }
            }
            let _ = tx.send(total);
        });

        let total = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("read() hung instead of skipping the dropped segment");

        // 5 segments at segment_size bytes each, minus the one dropped segment.
        assert_eq!(total, 4 * segment_size);
    }

    #[test]
    fn choose_live_start_walks_back_three_target_durations() {
        let mut stream = Stream::new(0, 1_000_000, url("https://cdn.example.com/p.m3u8"), 10_000, true, false, 0);
        for i in 0..10 {
            stream.append_segment(Segment::new(i, url("https://cdn.example.com/s.ts"), 10_000, None));
        }
        // threshold = 30s; walking back from segment 9: 10,20,30 (not >30
        // yet), 40 (>30) at segment 6.
        assert_eq!(choose_live_start(&stream), 6);
    }

    /// Serves a manifest but fails every segment fetch, so `open`'s initial
    /// prefetch can never complete — used to exercise scenario S6's
    /// interrupt-during-open path without racing a real stall.
    struct ManifestOnlyDownloader {
        manifest: String,
    }

    impl Downloader for ManifestOnlyDownloader {
        fn get(&self, url: &HlsUrl) -> Result<Bytes, HlsError> {
            if url.as_str().ends_with(".m3u8") {
                Ok(Bytes::from(self.manifest.clone()))
            } else {
                Err(HlsError::IoError("segment fetch never completes".into()))
            }
        }
        fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
            unreachable!()
        }
    }

    /// Scenario S6 (spec §8): a caller flips an externally-owned interrupt
    /// flag while `open` is still waiting on its initial prefetch. `open`
    /// must return promptly with either `Interrupted` or `PrefetchTimeout`,
    /// and must not leave its worker threads running.
    #[test]
    fn s6_interrupt_during_prefetch() {
        let downloader: Arc<dyn Downloader> = Arc::new(ManifestOnlyDownloader {
            manifest: vod_manifest(5),
        });
        let interrupted = Arc::new(AtomicBool::new(false));
        let flipper = Arc::clone(&interrupted);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            flipper.store(true, Ordering::Release);
        });

        let result = HlsBuffer::open_with_interrupt(
            "https://cdn.example.com/live/index.m3u8",
            downloader,
            None,
            interrupted,
        );

        match result {
            Err(HlsError::Interrupted) | Err(HlsError::PrefetchTimeout) => {}
            Err(other) => panic!("expected Interrupted or PrefetchTimeout, got {other:?}"),
            Ok(_) => panic!("expected open to abort on interrupt, but it succeeded"),
        }
    }
}
