//! File digest computation for the stowage plugin inventory.
//!
//! Plugin binaries are identified in the inventory by the SHA-256 of the
//! file as published inside its image. This crate computes that digest for
//! local files, streaming so large binaries do not get buffered whole.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use stowage_digest::sha256_file;
//!
//! let digest = sha256_file(Path::new("management-cluster")).expect("digest");
//! assert_eq!(digest.len(), 64);
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Read buffer size for streaming digests.
const BUF_SIZE: usize = 64 * 1024;

/// Compute the lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for digest: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("failed to read file for digest: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the lowercase hex SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
