use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// BLAKE3 digest of a file's full byte content.
///
/// The digest depends on bytes only; metadata (timestamps, permissions)
/// never enters the comparison. Empty files hash the empty input because
/// mapping a zero-length file is not portable.
pub fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = f.metadata().with_context(|| format!("stat {}", path.display()))?.len();
    if len == 0 {
        return Ok(blake3::hash(&[]));
    }
    let mmap = unsafe { Mmap::map(&f) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(blake3::hash(&mmap))
}

/// Hex form used everywhere a digest is persisted or compared as text.
pub fn hex(h: &blake3::Hash) -> String {
    h.to_hex().to_string()
}
