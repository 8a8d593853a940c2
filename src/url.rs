//! Structured URL handling.
//!
//! The teacher codebase resolves relative HLS URLs by hand-splicing strings
//! (`sources::youtube::hls::utils::resolve_url`). That approach is fragile
//! for query strings and percent-encoding, so this crate uses `url::Url`
//! throughout instead and never formats a URL by concatenation.

use std::fmt;

use crate::error::HlsError;

/// A parsed, absolute URL. Cheap to clone (wraps `url::Url`, which is
/// itself a thin wrapper around a `String`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HlsUrl(url::Url);

impl HlsUrl {
    pub fn parse(raw: &str) -> Result<Self, HlsError> {
        url::Url::parse(raw)
            .map(HlsUrl)
            .map_err(|e| HlsError::NotHls(format!("invalid URL {raw:?}: {e}")))
    }

    /// Resolve `maybe_relative` against this URL, the way a manifest's
    /// `EXT-X-STREAM-INF` URI or a segment URI is resolved against the
    /// playlist that referenced it.
    pub fn join(&self, maybe_relative: &str) -> Result<Self, HlsError> {
        self.0
            .join(maybe_relative)
            .map(HlsUrl)
            .map_err(|e| HlsError::NotHls(format!("invalid URL {maybe_relative:?}: {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// True when the URL's path ends in `.m3u8` or its query string mentions
    /// `m3u8` — used by [`crate::parser::is_http_live_streaming`] as a
    /// fallback when the response body itself is ambiguous.
    pub fn looks_like_m3u8(&self) -> bool {
        let path = self.0.path();
        if path.ends_with(".m3u8") {
            return true;
        }
        self.0.query().is_some_and(|q| q.contains("m3u8"))
    }
}

impl fmt::Display for HlsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for HlsUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_segment_uri() {
        let base = HlsUrl::parse("https://cdn.example.com/live/index.m3u8").unwrap();
        let seg = base.join("seg-0001.ts").unwrap();
        assert_eq!(seg.as_str(), "https://cdn.example.com/live/seg-0001.ts");
    }

    #[test]
    fn joins_absolute_path() {
        let base = HlsUrl::parse("https://cdn.example.com/live/index.m3u8").unwrap();
        let seg = base.join("/other/seg.ts").unwrap();
        assert_eq!(seg.as_str(), "https://cdn.example.com/other/seg.ts");
    }

    #[test]
    fn detects_m3u8_url() {
        let url = HlsUrl::parse("https://cdn.example.com/live/index.m3u8").unwrap();
        assert!(url.looks_like_m3u8());
        let url = HlsUrl::parse("https://cdn.example.com/live/playlist?x=1").unwrap();
        assert!(!url.looks_like_m3u8());
        let url = HlsUrl::parse("https://cdn.example.com/live/playlist?type=m3u8").unwrap();
        assert!(url.looks_like_m3u8());
    }
}
