//! On-disk `.bin` blobs, written next to the source bitmap.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bitmap::PackedBlob;

/// `image.bmp` -> `image.bin`
pub fn stage_path(input: &Path) -> PathBuf {
    input.with_extension("bin")
}

/// Write `blob` to `path`, replacing whatever was there.
pub fn write_blob(path: &Path, blob: &PackedBlob) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::write(path, blob)?;
    debug!(path = %path.display(), len = blob.len(), "staged blob");
    Ok(())
}

pub fn read_blob(path: &Path) -> io::Result<PackedBlob> {
    fs::read(path).map(PackedBlob::from)
}

/// True for paths that look like an already staged blob rather than a bitmap.
pub fn is_staged(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"))
}
