use rayon::prelude::*;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded blake3 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Stream a file through blake3 in fixed-size chunks and return the lowercase
/// hex digest. Memory use does not depend on the file size.
pub fn hash_file(file: &Path) -> io::Result<String> {
    let mut f = File::open(file)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = match f.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.finalize().to_hex().to_string();
    trace!("Hashed {} -> {}", file.display(), digest);
    Ok(digest)
}

/// Hash a batch of files in parallel. The result lines up with `files`; a file
/// that cannot be read yields `None` so it is still recorded, just not
/// deduplicable.
pub fn hash_files(files: &[PathBuf]) -> Vec<Option<String>> {
    files
        .par_iter()
        .map(|file| match hash_file(file) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Error hashing '{}': {}", file.display(), e);
                None
            }
        })
        .collect()
}
