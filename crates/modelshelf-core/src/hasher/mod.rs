pub mod content;

pub use content::{hash_file, hash_files, HASH_HEX_LEN};

use crate::storage::models::{DiscoveredFile, StoredScanState};

/// Decide whether a discovered file needs its content hashed again.
///
/// A file is re-hashed when nothing is stored for it, when the stored hash is
/// missing, or when either its size or modified time changed since the last
/// scan. Otherwise the stored digest is reused.
pub fn needs_rehash(file: &DiscoveredFile, stored: Option<&StoredScanState>) -> bool {
    match stored {
        None => true,
        Some(state) => {
            state.content_hash.as_deref().map_or(true, str::is_empty)
                || state.size_bytes != file.size_bytes
                || state.modified_at != file.modified_at
        }
    }
}
