//! `StreamWorker` (spec §4.4): keeps `READAHEAD` segments ahead of playback
//! downloaded, measures bandwidth, and adapts the rendition to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cursor::PlaybackCursor;
use crate::decryptor::Decryptor;
use crate::downloader::Downloader;
use crate::retry::{READAHEAD, SEGMENT_RETRY_DELAYS, WAIT_TIMEOUT};
use crate::stream::{download_segment, Stream};
use crate::stream_set::StreamSet;

/// State guarded by the worker's own mutex+condvar pair — the download map,
/// the current download position, and the running bandwidth average. The
/// reader and `PlaylistWorker` share this pair to wake the worker without
/// touching its internals directly (spec §5).
pub struct StreamWorkerState {
    pub stream_idx: usize,
    pub dl_segment_idx: usize,
    pub buffer_target: usize,
    /// segment index -> rendition index that supplied its bytes (spec §3
    /// "Download map").
    pub segmap: HashMap<usize, usize>,
    avg_bandwidth_bps: f64,
    bandwidth_samples: u64,
}

impl StreamWorkerState {
    fn record_bandwidth(&mut self, sample_bps: u64) {
        self.bandwidth_samples += 1;
        let n = self.bandwidth_samples as f64;
        self.avg_bandwidth_bps += (sample_bps as f64 - self.avg_bandwidth_bps) / n;
    }

    pub fn avg_bandwidth_bps(&self) -> u64 {
        self.avg_bandwidth_bps as u64
    }
}

pub type Shared = Arc<(Mutex<StreamWorkerState>, Condvar)>;

pub struct StreamWorker {
    shared: Shared,
    interrupted: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Spawns the background thread. `start_stream_idx`/`start_dl_idx` are
    /// the rendition and segment index `HlsBuffer::open` chose to start at.
    pub fn spawn(
        stream_set: Arc<StreamSet>,
        cursor: Arc<PlaybackCursor>,
        downloader: Arc<dyn Downloader>,
        decryptor: Option<Arc<dyn Decryptor>>,
        adaptive: bool,
        start_stream_idx: usize,
        start_dl_idx: usize,
    ) -> Self {
        let state = StreamWorkerState {
            stream_idx: start_stream_idx,
            dl_segment_idx: start_dl_idx,
            buffer_target: READAHEAD,
            segmap: HashMap::new(),
            avg_bandwidth_bps: 0.0,
            bandwidth_samples: 0,
        };
        let shared: Shared = Arc::new((Mutex::new(state), Condvar::new()));
        let interrupted = Arc::new(AtomicBool::new(false));

        let worker_shared = Arc::clone(&shared);
        let worker_interrupted = Arc::clone(&interrupted);

        let handle = std::thread::Builder::new()
            .name("hls-stream-worker".into())
            .spawn(move || {
                run(
                    worker_shared,
                    worker_interrupted,
                    stream_set,
                    cursor,
                    downloader,
                    decryptor,
                    adaptive,
                );
            })
            .expect("failed to spawn HLS stream worker thread");

        Self {
            shared,
            interrupted,
            handle: Some(handle),
        }
    }

    pub fn shared(&self) -> Shared {
        Arc::clone(&self.shared)
    }

    pub fn wake(&self) {
        self.shared.1.notify_all();
    }

    /// Reassigns the download head (spec §4.4 "Seek"). Existing `segmap`
    /// entries are left intact — already-downloaded segments stay usable.
    pub fn seek(&self, dl_segment_idx: usize) {
        let mut state = self.shared.0.lock().unwrap();
        state.dl_segment_idx = dl_segment_idx;
        drop(state);
        self.wake();
    }

    pub fn is_downloaded(&self, segment_idx: usize) -> Option<usize> {
        self.shared.0.lock().unwrap().segmap.get(&segment_idx).copied()
    }

    /// Erases a `segmap` entry once the reader has finished a live or
    /// non-cached segment and freed its bytes (spec §4.7 step 4).
    pub fn clear_downloaded(&self, segment_idx: usize) {
        self.shared.0.lock().unwrap().segmap.remove(&segment_idx);
    }

    pub fn dl_segment_idx(&self) -> usize {
        self.shared.0.lock().unwrap().dl_segment_idx
    }

    pub fn current_stream_idx(&self) -> usize {
        self.shared.0.lock().unwrap().stream_idx
    }

    pub fn avg_bandwidth_bps(&self) -> u64 {
        self.shared.0.lock().unwrap().avg_bandwidth_bps()
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

fn run(
    shared: Shared,
    interrupted: Arc<AtomicBool>,
    stream_set: Arc<StreamSet>,
    cursor: Arc<PlaybackCursor>,
    downloader: Arc<dyn Downloader>,
    decryptor: Option<Arc<dyn Decryptor>>,
    adaptive: bool,
) {
    let (lock, cvar) = &*shared;
    let mut retries: u32 = 0;

    loop {
        if interrupted.load(Ordering::Acquire) {
            cvar.notify_all();
            return;
        }

        let Some((dl_idx, stream_idx)) = wait_for_work(lock, cvar, &interrupted, &stream_set, &cursor) else {
            cvar.notify_all();
            return;
        };

        let Some(stream_arc) = stream_set.get(stream_idx) else {
            cvar.notify_all();
            return;
        };

        // Step 4: if another rendition already supplied this index (e.g. the
        // rendition changed after this index was downloaded once already),
        // skip straight to advancing.
        let already_downloaded = lock.lock().unwrap().segmap.contains_key(&dl_idx);
        if !already_downloaded {
            let request = {
                let stream = stream_arc.lock().unwrap();
                stream.segment_download_request(dl_idx)
            };

            match request {
                Ok(request) => {
                    match download_segment(&request, downloader.as_ref(), decryptor.as_deref()) {
                        Ok((bytes, bandwidth_bps)) => {
                            retries = 0;
                            stream_arc.lock().unwrap().apply_segment_bytes(dl_idx, bytes);

                            let mut state = lock.lock().unwrap();
                            state.segmap.insert(dl_idx, stream_idx);
                            state.record_bandwidth(bandwidth_bps);
                            drop(state);

                            if adaptive {
                                maybe_adapt(&shared, &stream_set, bandwidth_bps);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(segment = dl_idx, attempt = retries, error = %e, "segment download failed");
                            if retries < SEGMENT_RETRY_DELAYS.len() as u32 {
                                let delay = SEGMENT_RETRY_DELAYS[retries as usize];
                                if !delay.is_zero() {
                                    std::thread::sleep(delay);
                                }
                                retries += 1;
                                // Retry this same index next iteration without
                                // advancing the download head.
                                cvar.notify_all();
                                continue;
                            }
                            tracing::error!(segment = dl_idx, "dropping segment after exhausting retries");
                            retries = 0;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(segment = dl_idx, error = %e, "no download request for segment");
                }
            }
        }

        // Step 7: advance unless a concurrent seek already moved the head.
        let mut state = lock.lock().unwrap();
        if state.dl_segment_idx == dl_idx {
            state.dl_segment_idx += 1;
        }
        cvar.notify_all();
    }
}

/// Waits until there's work to do (spec §4.4 steps 1-3), returning the
/// `(dl_segment_idx, stream_idx)` snapshot to act on, or `None` if the
/// worker should exit.
fn wait_for_work(
    lock: &Mutex<StreamWorkerState>,
    cvar: &Condvar,
    interrupted: &AtomicBool,
    stream_set: &StreamSet,
    cursor: &PlaybackCursor,
) -> Option<(usize, usize)> {
    let mut state = lock.lock().unwrap();
    loop {
        if interrupted.load(Ordering::Acquire) {
            return None;
        }

        let Some(stream_arc) = stream_set.get(state.stream_idx) else {
            return None;
        };
        let (live, num_segments) = {
            let stream = stream_arc.lock().unwrap();
            (stream.live, stream.num_segments())
        };

        let play_idx = cursor.segment_idx();
        let too_far_ahead =
            !live && (play_idx as i64) < (state.dl_segment_idx as i64 - state.buffer_target as i64);
        let exhausted = state.dl_segment_idx >= num_segments;

        if !too_far_ahead && !exhausted {
            return Some((state.dl_segment_idx, state.stream_idx));
        }

        let (guard, _timeout) = cvar.wait_timeout(state, WAIT_TIMEOUT).unwrap();
        state = guard;
    }
}

/// Bitrate adaptation (spec §4.4 step 6): pick the rendition with the
/// highest bitrate not exceeding `bandwidth_bps`, same program, and switch
/// to it if it differs from the one currently being downloaded.
fn maybe_adapt(shared: &Shared, stream_set: &StreamSet, bandwidth_bps: u64) {
    let mut state = shared.0.lock().unwrap();
    let Some(current) = stream_set.get(state.stream_idx) else {
        return;
    };
    let (program_id, current_bitrate) = {
        let current = current.lock().unwrap();
        (current.program_id, current.bitrate_bps)
    };

    if current_bitrate == bandwidth_bps {
        return;
    }

    let mut best: Option<(usize, u64)> = None;
    for (idx, candidate) in stream_set.snapshot().into_iter().enumerate() {
        let candidate = candidate.lock().unwrap();
        if candidate.program_id != program_id || candidate.bitrate_bps > bandwidth_bps {
            continue;
        }
        if best.is_none_or(|(_, best_bitrate)| candidate.bitrate_bps > best_bitrate) {
            best = Some((idx, candidate.bitrate_bps));
        }
    }

    if let Some((idx, bitrate)) = best {
        if idx != state.stream_idx {
            tracing::info!(
                from_bitrate = current_bitrate,
                to_bitrate = bitrate,
                measured_bps = bandwidth_bps,
                "adapting rendition"
            );
            state.stream_idx = idx;
        }
    }
}
