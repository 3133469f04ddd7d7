// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

//! Read-only walker behind the `inspect` binary.
//!
//! Everything here goes through [`clustertree_core`]'s public API only --
//! no private module is reachable from a separate binary crate, so this is
//! also a check that the public surface is enough to answer basic
//! "what's in this file" questions without a write transaction.

use clustertree_core::fs::StdFileSystem;
use clustertree_core::{Db, Error, ReadTxn, Result};
use humansize::{SizeFormatter, BINARY};

/// Prints a one-line summary: file size, table count, and the version this
/// snapshot was opened at.
pub fn print_info(db: &Db<StdFileSystem>) -> Result<()> {
    let read = db.read()?;
    println!("file size:    {}", SizeFormatter::new(db.file_size(), BINARY));
    println!("version:      {}", read.version());
    println!("table count:  {}", read.group().table_count(read.alloc())?);
    Ok(())
}

/// Prints one line per table: name, column count, row count.
pub fn print_tables(db: &Db<StdFileSystem>) -> Result<()> {
    let read = db.read()?;
    let group = read.group();
    let alloc = read.alloc();

    for i in 0..group.table_count(alloc)? {
        let name = group.table_name(alloc, i)?;
        let table = group.get_table(alloc, &name)?;
        println!("{name}\t{} columns\t{} rows", table.column_count(), table.row_count());
    }
    Ok(())
}

/// Prints a single table's column types, one per line.
pub fn print_schema(db: &Db<StdFileSystem>, table_name: &str) -> Result<()> {
    let read = db.read()?;
    let table = lookup(&read, table_name)?;

    for i in 0..table.column_count() {
        println!("{i}\t{:?}", table.column_type(i)?);
    }
    Ok(())
}

/// Prints a single table's row count.
pub fn print_count(db: &Db<StdFileSystem>, table_name: &str) -> Result<()> {
    let read = db.read()?;
    let table = lookup(&read, table_name)?;
    println!("{}", table.row_count());
    Ok(())
}

fn lookup(read: &ReadTxn<StdFileSystem>, table_name: &str) -> Result<clustertree_core::Table> {
    if !read.group().has_table(read.alloc(), table_name)? {
        return Err(Error::NoSuchTable);
    }
    read.group().get_table(read.alloc(), table_name)
}
