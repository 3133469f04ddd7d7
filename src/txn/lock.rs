// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::error::{Error, Result};
use crate::file;
use crate::fs::FileSystem;
use crate::path::{lock_path, readers_path};
use crate::version::Version;
use fs4::fs_std::FileExt;
use std::fs::OpenOptions;
use std::path::Path;

/// Short-held OS lock serializing read-modify-write access to the reader
/// version sidecar, so two processes registering or unregistering a reader
/// at the same instant don't clobber each other's rewrite.
///
/// This is distinct from the single-writer exclusion lock, which is taken
/// directly on the database file itself via [`crate::mapper::Storage::lock`]
/// and held for an entire write transaction; this lock is only ever held
/// for the few instructions needed to read, edit, and rewrite the sidecar.
struct SidecarGuard(std::fs::File);

impl SidecarGuard {
    fn acquire<FS: FileSystem>(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.lock_exclusive()?;
        Ok(Self(file))
    }
}

impl Drop for SidecarGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// The set of versions a live read transaction somewhere might still be
/// traversing, persisted as a newline-separated list of decimal version
/// numbers so that other processes sharing the file can see it too,
/// consulted by the committer's free-list merge.
pub struct ReaderTable;

impl ReaderTable {
    /// Adds one occurrence of `version` to the live-reader set.
    pub fn register<FS: FileSystem>(db_path: &Path, version: Version) -> Result<()> {
        let _guard = SidecarGuard::acquire::<FS>(db_path)?;
        let mut versions = read_unlocked(db_path)?;
        versions.push(version);
        write_unlocked::<FS>(db_path, &versions)
    }

    /// Removes one occurrence of `version` from the live-reader set.
    pub fn unregister<FS: FileSystem>(db_path: &Path, version: Version) -> Result<()> {
        let _guard = SidecarGuard::acquire::<FS>(db_path)?;
        let mut versions = read_unlocked(db_path)?;
        if let Some(pos) = versions.iter().position(|&v| v == version) {
            versions.remove(pos);
        }
        write_unlocked::<FS>(db_path, &versions)
    }

    /// The oldest version any live reader might still need, or
    /// `current_writer_version` if no readers are registered.
    pub fn oldest_live_version<FS: FileSystem>(db_path: &Path, current_writer_version: Version) -> Result<Version> {
        let _guard = SidecarGuard::acquire::<FS>(db_path)?;
        let versions = read_unlocked(db_path)?;
        Ok(versions.into_iter().min().unwrap_or(current_writer_version))
    }
}

fn read_unlocked(db_path: &Path) -> Result<Vec<Version>> {
    let path = readers_path(db_path);
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter_map(|l| l.trim().parse().ok()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::from(e)),
    }
}

fn write_unlocked<FS: FileSystem>(db_path: &Path, versions: &[Version]) -> Result<()> {
    let path = readers_path(db_path);
    let content = versions.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
    file::rewrite_atomic::<FS>(&path, content.as_bytes()).map_err(Error::from)
}

/// Acquires the single-writer exclusion lock directly on the database file,
/// blocking until any other writer (in this process or another) releases it.
pub fn lock_writer(storage: &dyn crate::mapper::Storage, blocking: bool) -> Result<()> {
    storage.lock(true, blocking)
}
