// pgvault/src/backup/fingerprint.rs
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::Result;

const CHUNK_SIZE: usize = 8192;

/// Streams the file through SHA-256 and returns the lowercase hex digest.
///
/// The digest is only a change marker between runs.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}
