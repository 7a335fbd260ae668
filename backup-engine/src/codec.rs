//! Payload compression and content digests.
//!
//! Checksums are always taken over the compressed bytes, i.e. exactly what
//! is uploaded to and later downloaded from the blob store.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Supported payload compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    Zstd,
}

impl CompressionAlgorithm {
    /// Tag stored in `BackupRecord::compression`
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }

    /// Blob key extension for a JSON payload compressed with this algorithm
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "json.gz",
            CompressionAlgorithm::Zstd => "json.zst",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "application/gzip",
            CompressionAlgorithm::Zstd => "application/zstd",
        }
    }

    pub fn level_range(&self) -> RangeInclusive<i32> {
        match self {
            CompressionAlgorithm::Gzip => 0..=9,
            CompressionAlgorithm::Zstd => 1..=22,
        }
    }

    fn default_level(&self) -> i32 {
        match self {
            CompressionAlgorithm::Gzip => 6,
            CompressionAlgorithm::Zstd => 3,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionAlgorithm::Gzip),
            "zstd" | "zst" => Ok(CompressionAlgorithm::Zstd),
            other => Err(EngineError::Compression(format!(
                "unsupported compression algorithm: {other}"
            ))),
        }
    }
}

/// Compress `data`; `level` falls back to the algorithm default.
pub fn compress(algorithm: CompressionAlgorithm, data: &[u8], level: Option<i32>) -> Result<Vec<u8>> {
    let level = level.unwrap_or_else(|| algorithm.default_level());
    match algorithm {
        CompressionAlgorithm::Gzip => {
            use flate2::write::GzEncoder;
            use flate2::Compression;

            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.clamp(0, 9) as u32));
            encoder
                .write_all(data)
                .map_err(|e| EngineError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| EngineError::Compression(e.to_string()))
        }
        CompressionAlgorithm::Zstd => zstd::encode_all(data, level)
            .map_err(|e| EngineError::Compression(e.to_string())),
    }
}

pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::Gzip => {
            use flate2::read::GzDecoder;

            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| EngineError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionAlgorithm::Zstd => {
            zstd::decode_all(data).map_err(|e| EngineError::Compression(e.to_string()))
        }
    }
}

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare a payload against an expected digest.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(EngineError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_and_zstd_restore_input() {
        let data = br#"{"employees":[{"id":{"t":"int","v":1}}]}"#.repeat(50);
        for algorithm in [CompressionAlgorithm::Gzip, CompressionAlgorithm::Zstd] {
            let packed = compress(algorithm, &data, None).unwrap();
            assert!(packed.len() < data.len(), "{algorithm} did not shrink input");
            assert_eq!(decompress(algorithm, &packed).unwrap(), data);
        }
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let err = decompress(CompressionAlgorithm::Gzip, b"not gzip at all").unwrap_err();
        assert!(matches!(err, EngineError::Compression(_)));
        assert!(decompress(CompressionAlgorithm::Zstd, b"not zstd either").is_err());
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_checksum() {
        let digest = sha256_hex(b"payload");
        assert!(verify_checksum(b"payload", &digest).is_ok());
        assert!(verify_checksum(b"payload", &digest.to_uppercase()).is_ok());

        match verify_checksum(b"payl0ad", &digest) {
            Err(EngineError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, digest);
                assert_ne!(actual, digest);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_algorithm_tags() {
        assert_eq!("GZIP".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Gzip);
        assert_eq!("zstd".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Zstd);
        assert!("lz4".parse::<CompressionAlgorithm>().is_err());
        assert_eq!(CompressionAlgorithm::Zstd.extension(), "json.zst");
        assert_eq!(CompressionAlgorithm::Gzip.to_string(), "gzip");
    }
}
