//! The `Downloader` capability (spec §1, §4.2, §4.9) — out of scope for this
//! core in the sense that any re-entrant HTTP client works; this module
//! supplies the default one used by [`crate::buffer::HlsBuffer::open`].
//!
//! Mirrors how the teacher builds its blocking client in
//! `audio::hls::HlsReader::new`: a fixed desktop user-agent, an optional
//! bound local address, an optional HTTP proxy with basic auth, and a fixed
//! request timeout.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::HlsError;
use crate::url::HlsUrl;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/134.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A byte range for a partial GET (`EXT-X-BYTERANGE`, spec §3).
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// Optional HTTP proxy, configured the way `HttpProxyConfig` is in the
/// teacher's `configs` module — an embedding application can deserialize
/// this straight out of its own TOML/JSON config alongside the rest of its
/// settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The external HTTP client capability. Implementations must be re-entrant
/// (spec §5: "the external Downloader and Parser must be re-entrant") since
/// `StreamWorker` and `PlaylistWorker` call it concurrently from separate
/// threads.
pub trait Downloader: Send + Sync {
    /// Fetch the whole resource.
    fn get(&self, url: &HlsUrl) -> Result<Bytes, HlsError>;

    /// Fetch a byte range of the resource (used for `EXT-X-BYTERANGE`
    /// segments and `EXT-X-MAP` init sections).
    fn get_range(&self, url: &HlsUrl, range: ByteRange) -> Result<Bytes, HlsError>;

    /// Fetch the resource as UTF-8 text (manifests).
    fn get_text(&self, url: &HlsUrl) -> Result<String, HlsError> {
        let bytes = self.get(url)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HlsError::IoError(format!("non-utf8 response from {url}: {e}")))
    }
}

/// Default `Downloader` backed by `reqwest::blocking`.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, HlsError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpDownloaderBuilder {
        HttpDownloaderBuilder::default()
    }
}

#[derive(Default)]
pub struct HttpDownloaderBuilder {
    local_addr: Option<IpAddr>,
    proxy: Option<ProxyConfig>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpDownloaderBuilder {
    pub fn local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn build(self) -> Result<HttpDownloader, HlsError> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()))
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT));

        if let Some(ip) = self.local_addr {
            builder = builder.local_address(ip);
        }

        if let Some(proxy_cfg) = &self.proxy {
            tracing::debug!("HLS downloader: configuring proxy {}", proxy_cfg.url);
            let mut proxy = reqwest::Proxy::all(&proxy_cfg.url)
                .map_err(|e| HlsError::IoError(format!("invalid proxy url: {e}")))?;
            if let (Some(user), Some(pass)) = (&proxy_cfg.username, &proxy_cfg.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| HlsError::IoError(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpDownloader { client })
    }
}

impl Downloader for HttpDownloader {
    fn get(&self, url: &HlsUrl) -> Result<Bytes, HlsError> {
        let res = self
            .client
            .get(url.as_str())
            .header("Accept", "application/x-mpegURL, */*")
            .send()?;

        if !res.status().is_success() {
            return Err(HlsError::IoError(format!(
                "fetch failed {}: {}",
                res.status(),
                url
            )));
        }

        Ok(res.bytes()?)
    }

    fn get_range(&self, url: &HlsUrl, range: ByteRange) -> Result<Bytes, HlsError> {
        let end = range.offset + range.length.saturating_sub(1);
        let res = self
            .client
            .get(url.as_str())
            .header("Accept", "*/*")
            .header("Range", format!("bytes={}-{}", range.offset, end))
            .send()?;

        if !res.status().is_success() {
            return Err(HlsError::IoError(format!(
                "ranged fetch failed {}: {}",
                res.status(),
                url
            )));
        }

        Ok(res.bytes()?)
    }
}
