// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

pub mod lock;

use crate::alloc::{Allocator, FrozenBytes};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::group::Group;
use crate::mapper::Storage;
use crate::ref_::Ref;
use crate::version::{Version, VersionCounter};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

/// An open database file: the write side of storage plus transaction
/// bookkeeping.
///
/// Only one write transaction may be open at a time, enforced by an
/// exclusive OS lock taken directly on the database file.
/// Readers never take this lock, so a long-running reader never blocks the
/// writer, nor does the writer ever block a reader -- the committer only
/// ever adds a new top array and flips the selector, leaving every byte a
/// reader might still be looking at untouched.
pub struct Db<FS: FileSystem> {
    path: PathBuf,
    storage: Box<dyn Storage>,
    is_shared: bool,
    versions: VersionCounter,
    _fs: PhantomData<FS>,
}

impl<FS: FileSystem> Db<FS> {
    /// Wraps an already-opened storage backend (plain or encrypted) as a database.
    #[must_use]
    pub fn new(path: PathBuf, storage: Box<dyn Storage>, is_shared: bool) -> Self {
        Self { path, storage, is_shared, versions: VersionCounter::default(), _fs: PhantomData }
    }

    /// Current size of the underlying file, in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.storage.size()
    }

    /// Starts a read transaction over whichever top ref is current right now.
    pub fn read(&self) -> Result<ReadTxn<FS>> {
        let header = self.storage.header()?;
        let mapping = Arc::new(FrozenBytes::new(self.storage.snapshot()));
        let alloc = Allocator::new(self.storage.size(), mapping);
        let version = self.versions.get();

        if self.is_shared {
            lock::ReaderTable::register::<FS>(&self.path, version)?;
        }

        let group = Group::open_snapshot(&alloc, Ref::new(header.current_top_ref()), self.is_shared)?;
        Ok(ReadTxn { alloc, group, path: self.path.clone(), version, is_shared: self.is_shared, _fs: PhantomData })
    }

    /// Starts a write transaction, blocking until any other writer has
    /// released the file's exclusive lock.
    pub fn write(&mut self) -> Result<WriteTxn<'_, FS>> {
        lock::lock_writer(self.storage.as_ref(), true)?;

        let header = self.storage.header()?;
        let mapping = Arc::new(FrozenBytes::new(self.storage.snapshot()));
        let alloc = Allocator::new(self.storage.size(), mapping);
        let group = Group::open_snapshot(&alloc, Ref::new(header.current_top_ref()), self.is_shared)?;

        // Predicted post-commit version, used to stamp this transaction's
        // freed ranges; made official by `versions.advance()` once the
        // commit actually lands.
        let writer_version = self.versions.get() + 1;

        Ok(WriteTxn { db: self, alloc, group, writer_version })
    }
}

/// A read-only, point-in-time view of the catalogue.
///
/// Dropping it releases this transaction's pin on the on-file free list, so
/// the version it was reading at no longer constrains the committer's free
/// space reuse.
pub struct ReadTxn<FS: FileSystem> {
    alloc: Allocator,
    group: Group,
    path: PathBuf,
    version: Version,
    is_shared: bool,
    _fs: PhantomData<FS>,
}

impl<FS: FileSystem> ReadTxn<FS> {
    /// The table catalogue as of this transaction's snapshot.
    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// The frozen allocator backing this transaction's reads.
    #[must_use]
    pub fn alloc(&self) -> &Allocator {
        &self.alloc
    }

    /// The version this transaction is pinned to.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }
}

impl<FS: FileSystem> Drop for ReadTxn<FS> {
    fn drop(&mut self) {
        if self.is_shared {
            let _ = lock::ReaderTable::unregister::<FS>(&self.path, self.version);
        }
    }
}

/// A mutable transaction against the catalogue.
///
/// Mutations accumulate in the allocator's slab zone and are invisible to
/// every other transaction until [`WriteTxn::commit`] runs the committer;
/// dropping a `WriteTxn` without committing simply discards the slabs and
/// releases the writer lock, which is the entire rollback story -- nothing
/// was ever written to storage.
pub struct WriteTxn<'db, FS: FileSystem> {
    db: &'db mut Db<FS>,
    alloc: Allocator,
    group: Group,
    writer_version: Version,
}

impl<FS: FileSystem> WriteTxn<'_, FS> {
    /// The table catalogue visible to this transaction.
    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Mutable access to the table catalogue.
    pub fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    /// Disjoint mutable access to the catalogue and the allocator at once.
    ///
    /// `Group`'s mutating methods (`add_table`, `put_table`, ...) take an
    /// `&mut Allocator` argument, so a call site that needs both can't chain
    /// `group_mut()` and `alloc_mut()` in one expression -- each is its own
    /// `&mut self` reborrow of `txn`, and the borrow checker can't see that
    /// they touch disjoint fields across the call boundary. Destructuring
    /// this pair up front sidesteps that.
    pub fn group_and_alloc_mut(&mut self) -> (&mut Group, &mut Allocator) {
        (&mut self.group, &mut self.alloc)
    }

    /// The allocator backing this transaction's reads and writes.
    #[must_use]
    pub fn alloc(&self) -> &Allocator {
        &self.alloc
    }

    /// Mutable access to the allocator.
    pub fn alloc_mut(&mut self) -> &mut Allocator {
        &mut self.alloc
    }

    /// Runs the committer, making this transaction's mutations durable and
    /// visible, then advances the version counter and releases the writer
    /// lock.
    pub fn commit(mut self) -> Result<()> {
        let oldest = if self.db.is_shared {
            lock::ReaderTable::oldest_live_version::<FS>(&self.db.path, self.writer_version)?
        } else {
            self.writer_version
        };

        crate::commit::commit(&mut self.alloc, self.db.storage.as_mut(), &mut self.group, self.writer_version, oldest)?;
        self.db.versions.advance();

        Ok(())
    }

    /// Discards every mutation made through this transaction and releases
    /// the writer lock, leaving the file exactly as it was before `write()`
    /// was called. Equivalent to dropping the transaction without calling
    /// [`WriteTxn::commit`]; spelled out as its own method for call sites
    /// that want to make the rollback explicit rather than relying on scope
    /// exit. Consuming `self` here runs the same [`Drop`] impl that a bare
    /// scope exit would.
    pub fn rollback(self) {}
}

impl<FS: FileSystem> Drop for WriteTxn<'_, FS> {
    fn drop(&mut self) {
        let _ = self.db.storage.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::ColumnType;
    use crate::cluster::Value;
    use crate::fs::StdFileSystem;
    use crate::key::Key;
    use crate::mapper::{FileMapper, OpenMode};
    use test_log::test;

    fn open_db(path: &std::path::Path) -> Db<StdFileSystem> {
        StdFileSystem::create_new(path).unwrap();
        let mapper = FileMapper::open::<StdFileSystem>(path, OpenMode::ReadWrite).unwrap();
        Db::new(path.to_path_buf(), Box::new(mapper), false)
    }

    #[test]
    fn write_then_read_sees_committed_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut db = open_db(&path);

        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "people", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();

        let read = db.read().unwrap();
        assert_eq!(1, read.group().table_count(read.alloc()).unwrap());
    }

    #[test]
    fn dropped_write_txn_without_commit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut db = open_db(&path);

        {
            let mut txn = db.write().unwrap();
            let (group, alloc) = txn.group_and_alloc_mut();
            group.add_table(alloc, "people", vec![ColumnType::Int]).unwrap();
        }

        let read = db.read().unwrap();
        assert_eq!(0, read.group().table_count(read.alloc()).unwrap());
    }

    #[test]
    fn explicit_rollback_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut db = open_db(&path);

        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "people", vec![ColumnType::Int]).unwrap();
        txn.rollback();

        let read = db.read().unwrap();
        assert_eq!(0, read.group().table_count(read.alloc()).unwrap());

        // The writer lock was released by rollback, so a fresh write
        // transaction can be started right away.
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "people", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();

        let read = db.read().unwrap();
        assert_eq!(1, read.group().table_count(read.alloc()).unwrap());
    }

    #[test]
    fn second_write_txn_builds_on_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut db = open_db(&path);

        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "people", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();

        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "people").unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(1)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "people", &table).unwrap();
        txn.commit().unwrap();

        let read = db.read().unwrap();
        let table = read.group().get_table(read.alloc(), "people").unwrap();
        assert_eq!(1, table.cluster().size());
    }
}
