//! SHA-256 content digests for archives.

use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::BpmError;
use crate::runtime::Runtime;

const BUFFER_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of a file, read through a fixed-size buffer.
#[tracing::instrument(skip(runtime))]
pub fn digest<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<String> {
    let mut reader = runtime
        .open(path)
        .with_context(|| format!("Failed to open {:?} for hashing", path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to hash {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether the file's digest equals `expected` (hex, case-insensitive).
pub fn verify<R: Runtime + ?Sized>(runtime: &R, path: &Path, expected: &str) -> Result<bool> {
    let actual = digest(runtime, path)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

/// Fails with [`BpmError::ChecksumMismatch`] unless the digest matches.
pub fn ensure<R: Runtime + ?Sized>(runtime: &R, path: &Path, expected: &str) -> Result<()> {
    let actual = digest(runtime, path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(BpmError::ChecksumMismatch {
            expected: expected.trim().to_lowercase(),
            actual,
        }
        .into());
    }
    debug!("Checksum verified for {:?}", path);
    Ok(())
}
