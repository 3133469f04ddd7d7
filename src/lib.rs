// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

//! An embedded, single-file object database: a B+-tree-of-clusters row
//! store on a copy-on-write slab allocator, backed by a memory-mapped,
//! optionally encrypted, dual-header file.
//!
//! ##### About
//!
//! Every table's rows live in a cluster tree, a B+-tree whose leaves hold
//! fixed-size runs of rows (a "cluster") rather than one entry per key, so
//! sequential scans touch few nodes. Mutations never overwrite a
//! live page: every write copies the smallest subtree it touches into a
//! fresh slab and only makes that copy visible by flipping a single
//! selector byte in the file header at the end of a commit. Until that
//! flip, every other reader keeps seeing the file exactly as it was.
//!
//! A [`config::Config`] opens (or creates) a single database file and
//! returns a [`txn::Db`]. From there, [`txn::Db::write`] starts a mutable
//! transaction over a [`group::Group`] (the table catalogue), and
//! [`txn::Db::read`] starts a read-only snapshot that never blocks, and is
//! never blocked by, the single writer.
//!
//! # Example usage
//!
//! ```
//! use clustertree_core::{Config, ColumnType, Key, Value};
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("example.db");
//!
//! let mut db = Config::new(&path).open()?;
//!
//! let mut txn = db.write()?;
//! let (group, alloc) = txn.group_and_alloc_mut();
//! let mut table = group.add_table(alloc, "people", vec![ColumnType::Int])?;
//! table.cluster_mut().insert(txn.alloc_mut(), Key::new(0), vec![Value::Int(42)])?;
//! table.sync(txn.alloc_mut())?;
//! let (group, alloc) = txn.group_and_alloc_mut();
//! group.put_table(alloc, "people", &table)?;
//! txn.commit()?;
//!
//! let read = db.read()?;
//! let table = read.group().get_table(read.alloc(), "people")?;
//! assert_eq!(Value::Int(42), table.cluster().get_value(read.alloc(), Key::new(0), 0)?);
//! #
//! # Ok::<(), clustertree_core::Error>(())
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/clustertree-db/clustertree-core/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/clustertree-db/clustertree-core/main/logo.png")]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod alloc;
mod array;
mod binary_search;
mod cluster;
mod coding;

/// Column type tags: the fixed set of value kinds a column's cells may hold.
pub mod column_type;

mod commit;

/// The [`Config`] builder used to open or create a database file.
pub mod config;

#[cfg(feature = "encryption")]
mod crypto;

/// Error and result types returned throughout the storage engine.
pub mod error;

mod file;

/// The filesystem abstraction [`Db`] is generic over, so tests can swap in
/// a mock backend; [`fs::StdFileSystem`] is the real one.
pub mod fs;

/// The table catalogue ([`Group`]) and individual tables ([`Table`]).
pub mod group;

/// Signed row keys.
pub mod key;

mod mapper;
mod path;

/// Slab/file byte-offset references, tagged so a slot can alternatively
/// hold a small literal inline.
pub mod ref_;

/// Transactions: [`Db`], [`ReadTxn`], [`WriteTxn`].
pub mod txn;

/// Commit version numbers.
pub mod version;

pub use cluster::Value;
pub use column_type::ColumnType;
pub use config::Config;
pub use error::{Error, Result};
pub use group::{Group, Table};
pub use key::Key;
pub use ref_::Ref;
pub use txn::{Db, ReadTxn, WriteTxn};
pub use version::Version;
