// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

#[cfg(feature = "encryption")]
use crate::crypto::{EncryptedFile, PageKey};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};
use crate::mapper::{FileMapper, OpenMode, Storage};
use crate::txn::Db;
use std::path::{Path, PathBuf};

/// Builder for opening a database file.
///
/// An owned path, `#[must_use]` chained setters, and a terminal
/// [`Config::open`] that performs the actual I/O.
#[derive(Clone)]
pub struct Config {
    path: PathBuf,
    read_only: bool,
    is_shared: bool,
    #[cfg(feature = "encryption")]
    encryption_key: Option<[u8; 64]>,
    create_if_missing: bool,
}

impl Config {
    /// Starts a builder for the database file at `path`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: crate::path::absolute_path(path),
            read_only: false,
            is_shared: false,
            #[cfg(feature = "encryption")]
            encryption_key: None,
            create_if_missing: true,
        }
    }

    /// Opens the file read-only; mutating transactions will fail.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enables per-entry reader version stamps on the free list, so a
    /// committer running in another process can safely compute its own
    /// oldest-live-reader floor.
    #[must_use]
    pub fn is_shared(mut self, is_shared: bool) -> Self {
        self.is_shared = is_shared;
        self
    }

    /// Enables the page-level encryption layer with the given 64-byte key
    /// (first 32 bytes AES-256, last 32 bytes HMAC-SHA-256).
    #[cfg(feature = "encryption")]
    #[must_use]
    pub fn encryption_key(mut self, key: [u8; 64]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Whether to create the file if it doesn't exist yet. Defaults to
    /// `true` unless overridden, and is always treated as `false` when
    /// `read_only` is set.
    #[must_use]
    pub fn create_if_missing(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }

    /// Opens (creating if necessary and requested) the configured file.
    pub fn open(self) -> Result<Db<StdFileSystem>> {
        self.open_with::<StdFileSystem>()
    }

    fn open_with<FS: FileSystem>(self) -> Result<Db<FS>> {
        if !self.read_only && self.create_if_missing && !FS::exists(&self.path)? {
            FS::create_new(&self.path)?;
        }

        let mode = if self.read_only { OpenMode::ReadOnly } else { OpenMode::ReadWrite };

        #[cfg(feature = "encryption")]
        let storage: Box<dyn Storage> = match self.encryption_key {
            Some(key) => Box::new(EncryptedFile::open::<FS>(&self.path, mode, PageKey::from_bytes(&key))?),
            None => Box::new(FileMapper::open::<FS>(&self.path, mode)?),
        };
        #[cfg(not(feature = "encryption"))]
        let storage: Box<dyn Storage> = Box::new(FileMapper::open::<FS>(&self.path, mode)?);

        Ok(Db::new(self.path, storage, self.is_shared))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Config");
        s.field("path", &self.path).field("read_only", &self.read_only).field("is_shared", &self.is_shared);
        #[cfg(feature = "encryption")]
        s.field("encryption_key", &self.encryption_key.map(|_| "<redacted>"));
        s.field("create_if_missing", &self.create_if_missing).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn opens_fresh_file_and_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let mut db = Config::new(&path).open().unwrap();
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "people", vec![crate::column_type::ColumnType::Int]).unwrap();
        txn.commit().unwrap();
        drop(db);

        let db2 = Config::new(&path).create_if_missing(false).open().unwrap();
        let read = db2.read().unwrap();
        assert_eq!(1, read.group().table_count(read.alloc()).unwrap());
    }

    #[test]
    fn missing_file_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        assert!(matches!(Config::new(&path).create_if_missing(false).open(), Err(Error::FileNotFound)));
    }

    #[test]
    #[cfg(feature = "encryption")]
    fn encrypted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let key = [7_u8; 64];

        let mut db = Config::new(&path).encryption_key(key).open().unwrap();
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "t", vec![crate::column_type::ColumnType::Bool]).unwrap();
        txn.commit().unwrap();
        drop(db);

        let db2 = Config::new(&path).encryption_key(key).create_if_missing(false).open().unwrap();
        let read = db2.read().unwrap();
        assert_eq!(1, read.group().table_count(read.alloc()).unwrap());
    }
}
