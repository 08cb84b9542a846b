use crate::{Error, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

/// One stage of the page codec pipeline. `decode` must invert `encode`;
/// a decode failure is fatal for the page it was applied to.
pub trait ByteHandler: Send + Sync + std::fmt::Debug {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
    /// Identifier persisted in the resource configuration.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl ByteHandler for DeflateCompressor {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(bytes.len() * 4);
        DeflateDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| Error::corrupt(format!("deflate: {e}")))?;
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "DeflateCompressor"
    }
}

const NONCE_LEN: usize = 12;

/// AES-256-GCM stage; a fresh 96-bit nonce is prepended to each block.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl ByteHandler for AesGcmCipher {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, bytes)
            .map_err(|_| Error::Invariant("aes-gcm encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < NONCE_LEN {
            return Err(Error::corrupt("aes-gcm: block shorter than nonce"));
        }
        let nonce = Nonce::from_slice(&bytes[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &bytes[NONCE_LEN..])
            .map_err(|_| Error::corrupt("aes-gcm: authentication failed"))
    }

    fn name(&self) -> &'static str {
        "AesGcmCipher"
    }
}

/// Trailing crc32 over the payload; verified and stripped on decode.
#[derive(Debug, Default)]
pub struct Checksummer;

impl ByteHandler for Checksummer {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(bytes.len() + 4);
        out.extend_from_slice(bytes);
        out.extend_from_slice(&crc32fast::hash(bytes).to_le_bytes());
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < 4 {
            return Err(Error::corrupt("checksum: block too short"));
        }
        let (payload, tail) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(tail.try_into().unwrap());
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(Error::corrupt(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(payload.to_vec())
    }

    fn name(&self) -> &'static str {
        "Checksummer"
    }
}

/// Ordered codec stages, applied left-to-right on encode and
/// right-to-left on decode.
#[derive(Debug, Default)]
pub struct BytePipeline {
    handlers: Vec<Box<dyn ByteHandler>>,
}

impl BytePipeline {
    pub fn new(handlers: Vec<Box<dyn ByteHandler>>) -> Self {
        Self { handlers }
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn encode(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let mut cur = bytes;
        for handler in &self.handlers {
            cur = handler.encode(&cur)?;
        }
        Ok(cur)
    }

    pub fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let mut cur = bytes;
        for handler in self.handlers.iter().rev() {
            cur = handler.decode(&cur)?;
        }
        Ok(cur)
    }
}
