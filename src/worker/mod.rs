//! The two background actors (spec §2, §5): [`stream_worker`] downloads
//! segments ahead of playback and adapts bitrate; [`playlist_worker`]
//! refreshes a live manifest. Both are plain owned types holding a join
//! handle — no worker base class, no inheritance (spec §9) — communicating
//! with the reader and each other through a `(Mutex, Condvar)` pair plus a
//! lock-free `AtomicBool` interrupt flag.

pub mod playlist_worker;
pub mod stream_worker;
