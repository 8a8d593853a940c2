//! The `Decryptor` capability (spec §1, §4.3) — AES-128 segment decryption
//! keyed by the `EXT-X-KEY` URI and the segment's IV.
//!
//! Uses `aes` + `cbc` + `cipher`, already present in the teacher's
//! `Cargo.toml` (there, for Discord voice payload encryption) repurposed for
//! their textbook role: AES-128-CBC with PKCS#7 padding, which is what HLS
//! `METHOD=AES-128` specifies.

use std::collections::HashMap;
use std::sync::Mutex;

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::downloader::Downloader;
use crate::error::HlsError;
use crate::url::HlsUrl;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypts segment bytes in place. Implementations must be re-entrant:
/// `StreamWorker` calls this once per segment, eagerly at download
/// completion (spec §4.1: "decryption happens eagerly at download
/// completion ... so reads are pure memcpy").
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, key_url: &HlsUrl, iv: [u8; 16], data: &mut Vec<u8>) -> Result<(), HlsError>;
}

/// Default AES-128-CBC decryptor. Caches fetched keys by URL so a
/// `StreamWorker` downloading many segments under one `EXT-X-KEY` doesn't
/// refetch the 16-byte key per segment.
pub struct Aes128CbcDecryptor<D: Downloader> {
    downloader: D,
    key_cache: Mutex<HashMap<String, [u8; 16]>>,
}

impl<D: Downloader> Aes128CbcDecryptor<D> {
    pub fn new(downloader: D) -> Self {
        Self {
            downloader,
            key_cache: Mutex::new(HashMap::new()),
        }
    }

    fn fetch_key(&self, key_url: &HlsUrl) -> Result<[u8; 16], HlsError> {
        if let Some(key) = self.key_cache.lock().unwrap().get(key_url.as_str()) {
            return Ok(*key);
        }

        let bytes = self.downloader.get(key_url)?;
        if bytes.len() != 16 {
            return Err(HlsError::IoError(format!(
                "AES-128 key at {key_url} had length {} (expected 16)",
                bytes.len()
            )));
        }

        let mut key = [0u8; 16];
        key.copy_from_slice(&bytes);
        self.key_cache
            .lock()
            .unwrap()
            .insert(key_url.as_str().to_string(), key);
        Ok(key)
    }
}

impl<D: Downloader> Decryptor for Aes128CbcDecryptor<D> {
    fn decrypt(&self, key_url: &HlsUrl, iv: [u8; 16], data: &mut Vec<u8>) -> Result<(), HlsError> {
        let key = self.fetch_key(key_url)?;

        let plain = Aes128CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|e| HlsError::IoError(format!("AES-128 decrypt failed: {e}")))?;

        *data = plain;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ByteRange;
    use bytes::Bytes;
    use cbc::cipher::BlockEncryptMut;

    struct FixedKeyDownloader(Vec<u8>);

    impl Downloader for FixedKeyDownloader {
        fn get(&self, _url: &HlsUrl) -> Result<Bytes, HlsError> {
            Ok(Bytes::from(self.0.clone()))
        }

        fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
            unreachable!("not used in this test")
        }
    }

    #[test]
    fn round_trips_aes_128_cbc() {
        let key = [0x42u8; 16];
        let iv = [0x11u8; 16];
        let plaintext = b"hello hls segment payload, padded to cbc blocks!".to_vec();

        let encryptor = cbc::Encryptor::<Aes128>::new(&key.into(), &iv.into());
        let mut ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let decryptor = Aes128CbcDecryptor::new(FixedKeyDownloader(key.to_vec()));
        let key_url = HlsUrl::parse("https://cdn.example.com/key").unwrap();
        decryptor.decrypt(&key_url, iv, &mut ciphertext).unwrap();

        assert_eq!(ciphertext, plaintext);
    }

    #[test]
    fn caches_fetched_key() {
        struct CountingDownloader {
            key: Vec<u8>,
            calls: Mutex<u32>,
        }
        impl Downloader for CountingDownloader {
            fn get(&self, _url: &HlsUrl) -> Result<Bytes, HlsError> {
                *self.calls.lock().unwrap() += 1;
                Ok(Bytes::from(self.key.clone()))
            }
            fn get_range(&self, _url: &HlsUrl, _range: ByteRange) -> Result<Bytes, HlsError> {
                unreachable!()
            }
        }

        let downloader = CountingDownloader {
            key: vec![0u8; 16],
            calls: Mutex::new(0),
        };
        let decryptor = Aes128CbcDecryptor::new(downloader);
        let key_url = HlsUrl::parse("https://cdn.example.com/key").unwrap();

        let iv = [0u8; 16];
        let mut a = cbc::Encryptor::<Aes128>::new(&[0u8; 16].into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(b"segment one");
        let mut b = cbc::Encryptor::<Aes128>::new(&[0u8; 16].into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(b"segment two");

        decryptor.decrypt(&key_url, iv, &mut a).unwrap();
        decryptor.decrypt(&key_url, iv, &mut b).unwrap();

        assert_eq!(*decryptor.downloader.calls.lock().unwrap(), 1);
    }
}
