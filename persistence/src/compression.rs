//! Zstd compression of cache payloads

use crate::error::PersistenceError;
use crate::error::Result;
use std::io::Read;

/// Largest payload a cache entry may expand to.
const MAX_DECOMPRESSED_LEN: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fast,
    #[default]
    Balanced,
    Maximum,
}

impl CompressionLevel {
    pub const fn zstd_level(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Balanced => 3,
            Self::Maximum => 19,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub const fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub const fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn compress(&self, payload: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::encode_all(payload, self.level.zstd_level())
            .map_err(|e| PersistenceError::Compression(e.to_string()))
    }

    /// Expand a payload written by [`compress`](Self::compress).
    ///
    /// Input that is not a zstd frame, or that would expand past the entry
    /// size limit, is reported as a corruption error.
    pub fn decompress(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let decoder = zstd::stream::Decoder::new(frame).map_err(|e| PersistenceError::Compression(e.to_string()))?;
        let mut payload = Vec::new();
        decoder
            .take(MAX_DECOMPRESSED_LEN + 1)
            .read_to_end(&mut payload)
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;
        if payload.len() as u64 > MAX_DECOMPRESSED_LEN {
            return Err(PersistenceError::CorruptData(format!(
                "payload expands past {MAX_DECOMPRESSED_LEN} bytes"
            )));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_map_to_zstd() {
        assert_eq!(CompressionLevel::Fast.zstd_level(), 1);
        assert_eq!(CompressionLevel::default().zstd_level(), 3);
        assert_eq!(CompressionLevel::Maximum.zstd_level(), 19);
    }

    #[test]
    fn test_repetitive_payloads_shrink() {
        let compressor = Compressor::new(CompressionLevel::Fast);
        let payload = "identifier module.foo Local\n".repeat(64);

        let frame = compressor.compress(payload.as_bytes()).unwrap();
        assert!(frame.len() < payload.len());
        assert_eq!(compressor.decompress(&frame).unwrap(), payload.as_bytes());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let compressor = Compressor::default();
        let err = compressor.decompress(b"definitely not zstd").unwrap_err();
        assert!(err.is_corruption());
    }
}
