//! `PlaylistWorker` (spec §4.5): periodically re-fetches a live manifest
//! and merges the result into the live `StreamSet`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cursor::PlaybackCursor;
use crate::downloader::Downloader;
use crate::error::{FatalFlag, HlsError};
use crate::parser::{ParsedPlaylist, ParserAdapter};
use crate::retry::{PLAYLIST_FAILURE, STARVED_THRESHOLD_SEGMENTS, playlist_refresh_wait};
use crate::stream::Stream;
use crate::stream_set::StreamSet;
use crate::url::HlsUrl;
use crate::worker::stream_worker;

type Shared = Arc<(Mutex<()>, Condvar)>;

pub struct PlaylistWorker {
    shared: Shared,
    interrupted: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlaylistWorker {
    /// `master_url` is re-fetched each cycle (in addition to every known
    /// rendition's own manifest) so brand-new variants appearing in a live
    /// master playlist are discovered, not just changes to already-known
    /// renditions (spec §4.5 step 3's "otherwise append as a brand-new
    /// rendition" branch).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        stream_set: Arc<StreamSet>,
        cursor: Arc<PlaybackCursor>,
        downloader: Arc<dyn Downloader>,
        parser: Arc<ParserAdapter>,
        master_url: Option<HlsUrl>,
        stream_worker_shared: stream_worker::Shared,
        fatal: Arc<FatalFlag>,
        initial_wait: Duration,
    ) -> Self {
        let shared: Shared = Arc::new((Mutex::new(()), Condvar::new()));
        let interrupted = Arc::new(AtomicBool::new(false));

        let worker_shared = Arc::clone(&shared);
        let worker_interrupted = Arc::clone(&interrupted);

        let handle = std::thread::Builder::new()
            .name("hls-playlist-worker".into())
            .spawn(move || {
                run(
                    worker_shared,
                    worker_interrupted,
                    stream_set,
                    cursor,
                    downloader,
                    parser,
                    master_url,
                    stream_worker_shared,
                    fatal,
                    initial_wait,
                );
            })
            .expect("failed to spawn HLS playlist worker thread");

        Self {
            shared,
            interrupted,
            handle: Some(handle),
        }
    }

    pub fn wake(&self) {
        self.shared.1.notify_all();
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.wake();
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    shared: Shared,
    interrupted: Arc<AtomicBool>,
    stream_set: Arc<StreamSet>,
    cursor: Arc<PlaybackCursor>,
    downloader: Arc<dyn Downloader>,
    parser: Arc<ParserAdapter>,
    master_url: Option<HlsUrl>,
    stream_worker_shared: stream_worker::Shared,
    fatal: Arc<FatalFlag>,
    mut next_wait: Duration,
) {
    let (lock, cvar) = &*shared;
    let mut consecutive_failures: u32 = 0;

    loop {
        {
            let guard = lock.lock().unwrap();
            let _ = cvar.wait_timeout(guard, next_wait).unwrap();
        }
        if interrupted.load(Ordering::Acquire) {
            cvar.notify_all();
            return;
        }

        match refresh_once(&stream_set, downloader.as_ref(), parser.as_ref(), master_url.as_ref()) {
            Ok(()) => {
                consecutive_failures = 0;
                stream_worker_shared.1.notify_all();
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(attempt = consecutive_failures, error = %e, "playlist refresh failed");
                if consecutive_failures >= PLAYLIST_FAILURE {
                    tracing::error!(attempts = consecutive_failures, "giving up on playlist refresh, marking fatal");
                    fatal.set(HlsError::PlaylistRefreshFailed(consecutive_failures));
                    return;
                }
            }
        }

        if interrupted.load(Ordering::Acquire) {
            return;
        }

        let (target_duration_ms, live) = representative_metadata(&stream_set);
        let starved = is_starved(&stream_worker_shared, &cursor);

        next_wait = if starved && consecutive_failures <= 1 {
            // Don't back off while the reader is about to catch up to the
            // download head (spec §4.5: "the first failure retries
            // immediately" when starving).
            Duration::ZERO
        } else {
            playlist_refresh_wait(target_duration_ms, live, consecutive_failures)
        };
    }
}

fn representative_metadata(stream_set: &StreamSet) -> (i64, bool) {
    stream_set
        .get(0)
        .map(|s| {
            let s = s.lock().unwrap();
            (s.target_duration_ms, s.live)
        })
        .unwrap_or((1_000, true))
}

fn is_starved(stream_worker_shared: &stream_worker::Shared, cursor: &PlaybackCursor) -> bool {
    let dl_idx = stream_worker_shared.0.lock().unwrap().dl_segment_idx as i64;
    let play_idx = cursor.segment_idx() as i64;
    dl_idx - play_idx <= STARVED_THRESHOLD_SEGMENTS
}

fn refresh_once(
    stream_set: &StreamSet,
    downloader: &dyn Downloader,
    parser: &ParserAdapter,
    master_url: Option<&HlsUrl>,
) -> Result<(), HlsError> {
    if let Some(master_url) = master_url {
        discover_new_variants(stream_set, downloader, parser, master_url)?;
    }

    for rendition in stream_set.snapshot() {
        let (url, bitrate_bps) = {
            let s = rendition.lock().unwrap();
            (s.url.clone(), s.bitrate_bps)
        };
        let bytes = downloader.get(&url)?;
        let fresh = match parser.parse(&bytes, &url, bitrate_bps)? {
            ParsedPlaylist::Media { stream, .. } => stream,
            ParsedPlaylist::Master { .. } => {
                return Err(HlsError::IoError(format!("{url} switched from a media to a master playlist")));
            }
        };

        let mut existing = rendition.lock().unwrap();
        merge_rendition(&mut existing, fresh);
    }

    stream_set.sanitise();
    Ok(())
}

fn discover_new_variants(
    stream_set: &StreamSet,
    downloader: &dyn Downloader,
    parser: &ParserAdapter,
    master_url: &HlsUrl,
) -> Result<(), HlsError> {
    let bytes = downloader.get(master_url)?;
    let ParsedPlaylist::Master { variants } = parser.parse(&bytes, master_url, 0)? else {
        return Ok(()); // master_url stopped being a master; nothing new to discover
    };

    for variant in variants {
        if stream_set
            .find_by_program_and_bitrate(crate::parser::PROGRAM_ID, variant.bitrate_bps)
            .is_some()
        {
            continue;
        }

        let bytes = downloader.get(&variant.url)?;
        match parser.parse(&bytes, &variant.url, variant.bitrate_bps)? {
            ParsedPlaylist::Media { stream, .. } => {
                tracing::info!(bitrate_bps = variant.bitrate_bps, url = %variant.url, "discovered new rendition on playlist refresh");
                stream_set.push(stream);
            }
            ParsedPlaylist::Master { .. } => {
                tracing::warn!(url = %variant.url, "variant manifest unexpectedly a master playlist, skipping");
            }
        }
    }

    Ok(())
}

/// Merges a freshly-parsed rendition (`new`) into the live one (`old`),
/// spec §4.5 `update(new, old)`:
/// - matching `sequence_id`: compare identity, overwrite on mismatch
///   (content refetched on next read), otherwise leave untouched
/// - unmatched: append, logging (not failing) on a sequence gap
/// - copy rendition-level metadata from `new` last
pub fn merge_rendition(old: &mut Stream, mut new: Stream) {
    for fresh_segment in new.take_segments() {
        match old.find_segment(fresh_segment.sequence_id) {
            Some(idx) => {
                let differs = old
                    .get_segment(idx)
                    .is_some_and(|existing| !existing.same_identity(&fresh_segment));
                if differs {
                    tracing::warn!(sequence_id = fresh_segment.sequence_id, "segment record changed on refresh, overwriting");
                    old.overwrite_segment(idx, fresh_segment);
                }
            }
            None => {
                if let Some(last) = old.last_segment() {
                    if fresh_segment.sequence_id != last.sequence_id + 1 {
                        tracing::error!(
                            expected = last.sequence_id + 1,
                            got = fresh_segment.sequence_id,
                            "sequence gap merging refreshed playlist"
                        );
                    }
                }
                old.append_segment(fresh_segment);
            }
        }
    }

    old.update_with(&new);
}
