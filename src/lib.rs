// Copyright (c) 2026 appujet, notdeltaxd and contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A client-side HLS adaptive ring buffer: presents a seekable byte source
//! to a media demuxer while fetching a live or VOD manifest, maintaining
//! multiple bitrate renditions, downloading segments ahead of playback,
//! adapting bitrate to measured bandwidth, and refreshing the playlist for
//! live streams.
//!
//! The entry point is [`buffer::HlsBuffer`]. Construct a [`downloader::Downloader`]
//! (the default [`downloader::HttpDownloader`] wraps `reqwest::blocking`),
//! optionally a [`decryptor::Decryptor`] for `EXT-X-KEY`-protected streams,
//! and call [`buffer::HlsBuffer::open`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hls_ring_buffer::buffer::HlsBuffer;
//! use hls_ring_buffer::downloader::HttpDownloader;
//!
//! let downloader = Arc::new(HttpDownloader::new().unwrap());
//! let buffer = HlsBuffer::open("https://cdn.example.com/live/index.m3u8", downloader, None)
//!     .expect("failed to open HLS stream");
//!
//! let mut chunk = [0u8; 65_536];
//! loop {
//!     let n = buffer.read(&mut chunk).expect("read failed");
//!     if n == 0 {
//!         break;
//!     }
//!     // feed chunk[..n] to a demuxer
//! }
//! ```

pub mod buffer;
pub mod cursor;
pub mod decryptor;
pub mod downloader;
pub mod error;
pub mod parser;
pub mod retry;
pub mod segment;
pub mod stream;
pub mod stream_set;
pub mod url;
pub mod worker;

pub use buffer::{HlsBuffer, SeekWhence};
pub use error::HlsError;
