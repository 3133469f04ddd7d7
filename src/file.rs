// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::fs::FileSystem;
use std::{io::Write, path::Path};

/// First 4 bytes of the 24-byte file header: ASCII "T-DB".
pub const FORMAT_STAMP: [u8; 4] = *b"T-DB";

/// Total size of the file header.
pub const HEADER_SIZE: u64 = 24;

/// Atomically rewrites a sidecar file (writer lock metadata, reader version table).
///
/// Writes to a temp file in the same directory, fsyncs it, then renames over
/// the target -- the rename is the atomic step readers observe.
pub fn rewrite_atomic<F: FileSystem>(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    fsync_directory::<F>(folder)?;

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory<F: FileSystem>(path: &Path) -> std::io::Result<()> {
    let file = F::open_read_only(path)?;
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory<F: FileSystem>(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync a directory handle on Windows.
    Ok(())
}

/// Extends `file` to `new_len` bytes, preallocating so the tail reads as zero.
pub fn preallocate(file: &std::fs::File, new_len: u64) -> std::io::Result<()> {
    file.set_len(new_len)
}
