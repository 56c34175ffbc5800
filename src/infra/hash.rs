//! Streaming content hashing used for move verification and backups.
//!
//! Digests are formatted as `blake3:<hex>` so a manifest line is
//! self-describing if the algorithm ever changes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher as Blake3;

use crate::core::model::HashState;

const CHUNK: usize = 64 * 1024;

/// Stream a file into a blake3 digest as `blake3:<hex>`.
pub fn stream_blake3(path: &Path) -> Result<String> {
    let mut f =
        File::open(path).with_context(|| format!("open for checksum: {}", path.display()))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read for checksum: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a file unless it exceeds `max_bytes`; oversized files are flagged
/// rather than failing the scan.
pub fn hash_capped(path: &Path, size: u64, max_bytes: u64) -> Result<HashState> {
    if size > max_bytes {
        return Ok(HashState::Skipped);
    }
    Ok(HashState::Hashed(stream_blake3(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn digest_is_stable_and_prefixed() -> Result<()> {
        let tmp = TempDir::new()?;
        let p = tmp.path().join("x.txt");
        fs::write(&p, b"hello")?;

        let a = stream_blake3(&p)?;
        let b = stream_blake3(&p)?;
        assert_eq!(a, b);
        assert!(a.starts_with("blake3:"));
        Ok(())
    }

    #[test]
    fn differing_content_differs() -> Result<()> {
        let tmp = TempDir::new()?;
        let p1 = tmp.path().join("a.txt");
        let p2 = tmp.path().join("b.txt");
        fs::write(&p1, b"one")?;
        fs::write(&p2, b"two")?;
        assert_ne!(stream_blake3(&p1)?, stream_blake3(&p2)?);
        Ok(())
    }

    #[test]
    fn oversized_files_are_skipped_not_failed() -> Result<()> {
        let tmp = TempDir::new()?;
        let p = tmp.path().join("big.bin");
        fs::write(&p, vec![0u8; 2048])?;

        assert_eq!(hash_capped(&p, 2048, 1024)?, HashState::Skipped);
        assert!(matches!(hash_capped(&p, 2048, 4096)?, HashState::Hashed(_)));
        Ok(())
    }
}
