//! `ParserAdapter` — the thin wrapper around the external M3U8 parser
//! (spec §1, §4.3). Backed by `m3u8-rs`, the same crate the `hls`/
//! `mesio-engine` crates in the wider example pack reach for instead of a
//! hand-rolled line scanner (compare the teacher's own
//! `sources::youtube::hls::parser::parse_m3u8`, which this crate replaces).

use m3u8_rs::{Key, MasterPlaylist, MediaPlaylist, MediaSegment, Playlist, VariantStream};

use crate::error::HlsError;
use crate::segment::{Segment, SegmentKey};
use crate::stream::Stream;
use crate::url::HlsUrl;

/// Every rendition produced by this crate belongs to the same, single
/// program — master playlists with multiple MPEG-2-style program numbers
/// are out of scope (the teacher's `resolve_playlist` makes the same
/// simplification: it always resolves to one chosen variant).
pub const PROGRAM_ID: i32 = 0;

/// One entry of a master playlist, not yet fetched as a media playlist.
#[derive(Debug, Clone)]
pub struct MasterVariant {
    pub bitrate_bps: u64,
    pub url: HlsUrl,
}

/// Result of parsing one playlist response.
pub enum ParsedPlaylist {
    /// A master playlist: a list of renditions to fetch individually.
    Master { variants: Vec<MasterVariant> },
    /// A media playlist: a ready `Stream` with its segments, plus whether
    /// any segment carries an `EXT-X-KEY` (the `aes_flag` of spec §4.3).
    Media { stream: Stream, aes: bool },
}

/// Tests whether `bytes`/`url` look like an HLS resource (spec §4.3).
pub fn is_http_live_streaming(bytes: &[u8], url: &HlsUrl) -> bool {
    let prefix = &bytes[..bytes.len().min(512)];
    let looks_like_manifest = prefix
        .iter()
        .position(|&b| b == b'#')
        .is_some_and(|start| prefix[start..].starts_with(b"#EXTM3U"));
    looks_like_manifest || url.looks_like_m3u8()
}

pub struct ParserAdapter;

impl ParserAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parses `bytes` (fetched from `base_url`) into a [`ParsedPlaylist`].
    /// Idempotent: parsing the same bytes twice yields equal `Stream`s
    /// (spec §4.3) since no external state is consulted.
    pub fn parse(&self, bytes: &[u8], base_url: &HlsUrl, bitrate_bps: u64) -> Result<ParsedPlaylist, HlsError> {
        match m3u8_rs::parse_playlist_res(bytes) {
            Ok(Playlist::MasterPlaylist(master)) => Ok(ParsedPlaylist::Master {
                variants: master_variants(&master, base_url)?,
            }),
            Ok(Playlist::MediaPlaylist(media)) => {
                let (stream, aes) = media_to_stream(&media, base_url, bitrate_bps)?;
                Ok(ParsedPlaylist::Media { stream, aes })
            }
            Err(e) => Err(HlsError::NotHls(format!("{base_url}: {e:?}"))),
        }
    }
}

impl Default for ParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn master_variants(master: &MasterPlaylist, base_url: &HlsUrl) -> Result<Vec<MasterVariant>, HlsError> {
    master
        .variants
        .iter()
        .filter(|v: &&VariantStream| !v.is_i_frame)
        .map(|v| {
            Ok(MasterVariant {
                bitrate_bps: v.bandwidth,
                url: base_url.join(&v.uri)?,
            })
        })
        .collect()
}

fn media_to_stream(media: &MediaPlaylist, base_url: &HlsUrl, bitrate_bps: u64) -> Result<(Stream, bool), HlsError> {
    let target_duration_ms = (media.target_duration as f64 * 1000.0).round() as i64;
    let start_sequence = media.media_sequence as i64;
    let live = !media.end_list;

    let mut stream = Stream::new(
        PROGRAM_ID,
        bitrate_bps,
        base_url.clone(),
        target_duration_ms,
        live,
        /* cache = */ !live,
        start_sequence,
    );

    let mut any_aes = false;
    for (i, raw_segment) in media.segments.iter().enumerate() {
        let sequence_id = start_sequence + i as i64;
        let key = match segment_key(raw_segment, base_url, sequence_id)? {
            Some(k) => {
                any_aes = true;
                Some(k)
            }
            None => None,
        };

        let duration_ms = (raw_segment.duration as f64 * 1000.0).round() as i64;
        let url = base_url.join(&raw_segment.uri)?;
        stream.append_segment(Segment::new(sequence_id, url, duration_ms, key));
    }

    Ok((stream, any_aes))
}

fn segment_key(segment: &MediaSegment, base_url: &HlsUrl, sequence_id: i64) -> Result<Option<SegmentKey>, HlsError> {
    let Some(key) = &segment.key else {
        return Ok(None);
    };
    segment_key_from_tag(key, base_url, sequence_id)
}

fn segment_key_from_tag(key: &Key, base_url: &HlsUrl, sequence_id: i64) -> Result<Option<SegmentKey>, HlsError> {
    if key.method != "AES-128" {
        if key.method != "NONE" {
            tracing::warn!(method = %key.method, "unsupported EXT-X-KEY method, serving segment unencrypted-as-is");
        }
        return Ok(None);
    }

    let Some(uri) = &key.uri else {
        return Err(HlsError::NotHls("EXT-X-KEY method=AES-128 without a URI".into()));
    };

    let iv = match &key.iv {
        Some(hex_iv) => parse_iv(hex_iv)?,
        None => iv_from_sequence(sequence_id),
    };

    Ok(Some(SegmentKey {
        key_url: base_url.join(uri)?,
        iv,
    }))
}

/// Parses an `IV=0x...` attribute into 16 raw bytes.
fn parse_iv(hex_iv: &str) -> Result<[u8; 16], HlsError> {
    let trimmed = hex_iv.trim_start_matches("0x").trim_start_matches("0X");
    let bytes = hex::decode(trimmed).map_err(|e| HlsError::NotHls(format!("invalid EXT-X-KEY IV {hex_iv:?}: {e}")))?;
    if bytes.len() != 16 {
        return Err(HlsError::NotHls(format!("EXT-X-KEY IV {hex_iv:?} is not 16 bytes")));
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}

/// RFC 8216 §5.2: when a segment's `EXT-X-KEY` omits `IV`, the IV is the
/// segment's media sequence number encoded as a big-endian 128-bit integer.
fn iv_from_sequence(sequence_id: i64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..16].copy_from_slice(&(sequence_id as u64).to_be_bytes());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> HlsUrl {
        HlsUrl::parse(s).unwrap()
    }

    const MEDIA_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:10\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXTINF:10.0,\n\
seg0.ts\n\
#EXTINF:10.0,\n\
seg1.ts\n\
#EXT-X-ENDLIST\n";

    const MASTER_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=2000000\n\
high.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=500000\n\
low.m3u8\n";

    #[test]
    fn detects_m3u8_prefix() {
        let u = url("https://cdn.example.com/whatever");
        assert!(is_http_live_streaming(MEDIA_PLAYLIST.as_bytes(), &u));
        assert!(!is_http_live_streaming(b"not a playlist", &u));
    }

    #[test]
    fn parses_media_playlist_vod() {
        let parser = ParserAdapter::new();
        let base = url("https://cdn.example.com/live/index.m3u8");
        match parser.parse(MEDIA_PLAYLIST.as_bytes(), &base, 1_000_000).unwrap() {
            ParsedPlaylist::Media { stream, aes } => {
                assert!(!aes);
                assert!(!stream.live);
                assert_eq!(stream.num_segments(), 2);
                assert_eq!(stream.get_segment(0).unwrap().sequence_id, 0);
                assert_eq!(stream.get_segment(1).unwrap().sequence_id, 1);
                assert_eq!(stream.get_segment(0).unwrap().duration_ms, 10_000);
            }
            ParsedPlaylist::Master { .. } => panic!("expected media playlist"),
        }
    }

    #[test]
    fn parses_master_playlist_variants() {
        let parser = ParserAdapter::new();
        let base = url("https://cdn.example.com/live/master.m3u8");
        match parser.parse(MASTER_PLAYLIST.as_bytes(), &base, 0).unwrap() {
            ParsedPlaylist::Master { variants } => {
                assert_eq!(variants.len(), 2);
                assert_eq!(variants[0].bitrate_bps, 2_000_000);
                assert_eq!(variants[0].url.as_str(), "https://cdn.example.com/live/high.m3u8");
                assert_eq!(variants[1].bitrate_bps, 500_000);
            }
            ParsedPlaylist::Media { .. } => panic!("expected master playlist"),
        }
    }

    #[test]
    fn idempotent_parse() {
        let parser = ParserAdapter::new();
        let base = url("https://cdn.example.com/live/index.m3u8");
        let a = parser.parse(MEDIA_PLAYLIST.as_bytes(), &base, 1_000_000).unwrap();
        let b = parser.parse(MEDIA_PLAYLIST.as_bytes(), &base, 1_000_000).unwrap();
        let (ParsedPlaylist::Media { stream: a, .. }, ParsedPlaylist::Media { stream: b, .. }) = (a, b) else {
            panic!("expected media playlists");
        };
        assert_eq!(a.num_segments(), b.num_segments());
        assert_eq!(a.target_duration_ms, b.target_duration_ms);
    }

    #[test]
    fn iv_falls_back_to_sequence_number() {
        let iv = iv_from_sequence(42);
        assert_eq!(&iv[0..8], &[0u8; 8]);
        assert_eq!(u64::from_be_bytes(iv[8..16].try_into().unwrap()), 42);
    }

    #[test]
    fn parses_explicit_hex_iv() {
        let iv = parse_iv("0x000102030405060708090A0B0C0D0E0F").unwrap();
        assert_eq!(iv[0], 0x00);
        assert_eq!(iv[15], 0x0f);
    }
}
