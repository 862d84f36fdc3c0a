// src/hash.rs

//! SHA-256 hashing and artifact integrity verification
//!
//! Registries publish a hex SHA-256 digest for each artifact. The installer
//! checks every fetched artifact through an [`IntegrityVerifier`] before any
//! content is staged.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Streaming buffer size (8 KB)
const BUFFER_SIZE: usize = 8192;

/// Compute the hex SHA-256 digest of a byte slice
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the hex SHA-256 digest of everything a reader yields
pub fn sha256_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex SHA-256 digest of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Normalize a digest for comparison: trims, lowercases, drops a `sha256:` prefix
pub fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim();
    let digest = digest.strip_prefix("sha256:").unwrap_or(digest);
    digest.to_ascii_lowercase()
}

// =============================================================================
// Verification
// =============================================================================

/// Checks a byte stream against an expected digest
pub trait IntegrityVerifier: Send + Sync {
    /// Returns `Ok(false)` on mismatch; `Err` only for read failures
    fn verify(&self, reader: &mut dyn Read, expected: &str) -> Result<bool>;
}

/// SHA-256 verifier for hex digests
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Verifier;

impl IntegrityVerifier for Sha256Verifier {
    fn verify(&self, reader: &mut dyn Read, expected: &str) -> Result<bool> {
        let actual = sha256_reader(reader)?;
        Ok(actual == normalize_digest(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_hash() {
        let hash = sha256(b"Hello, World!");
        assert_eq!(
            hash,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert_eq!(hash.len(), 64); // 256 bits = 32 bytes = 64 hex chars
    }

    #[test]
    fn test_sha256_reader_matches_bytes() {
        let data = vec![7u8; BUFFER_SIZE * 3 + 11];
        let streamed = sha256_reader(&mut Cursor::new(&data)).unwrap();
        assert_eq!(streamed, sha256(&data));
    }

    #[test]
    fn test_verifier_accepts_and_rejects() {
        let digest = sha256(b"payload");
        let verifier = Sha256Verifier;

        assert!(verifier.verify(&mut Cursor::new(b"payload"), &digest).unwrap());
        assert!(verifier
            .verify(&mut Cursor::new(b"payload"), &format!("sha256:{}", digest.to_uppercase()))
            .unwrap());
        assert!(!verifier.verify(&mut Cursor::new(b"tampered"), &digest).unwrap());
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("artifact.tar.gz");
        std::fs::write(&path, b"Hello, World!").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256(b"Hello, World!"));
    }
}
