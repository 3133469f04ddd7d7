// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

pub mod table;

pub use table::Table;

use crate::alloc::Allocator;
use crate::array::{Array, WType, Width};
use crate::column_type::ColumnType;
use crate::error::{Error, Result};
use crate::ref_::{Ref, Tagged};

/// Slot count of a group's top array: `table_names, tables, logical_size,
/// free_positions, free_lengths` plus, when shared, `free_versions` and the
/// current transaction number.
const UNSHARED_TOP_SIZE: u32 = 5;
const SHARED_TOP_SIZE: u32 = 7;

/// A database's table catalogue: the top array reachable from the file
/// header's currently-selected `top_ref`.
///
/// Lazily bound: a freshly created file has `top_ref == 0` and no top array
/// at all, represented here as `top: None`. The first `add_table` call
/// allocates one.
pub struct Group {
    top: Option<Array>,
    is_shared: bool,
}

impl Group {
    /// A group over a brand new file with no tables yet.
    #[must_use]
    pub fn empty(is_shared: bool) -> Self {
        Self { top: None, is_shared }
    }

    /// Binds to the group named by `top_ref`, or an empty group if it is null.
    pub fn open_snapshot(alloc: &Allocator, top_ref: Ref, is_shared: bool) -> Result<Self> {
        if top_ref.is_null() {
            return Ok(Self::empty(is_shared));
        }

        let top = Array::init_from_ref(alloc, top_ref)?;
        let expected = if is_shared { SHARED_TOP_SIZE } else { UNSHARED_TOP_SIZE };
        if !top.has_refs() || top.size() != expected {
            return Err(Error::CorruptedFile("group top array shape mismatch"));
        }

        Ok(Self { top: Some(top), is_shared })
    }

    /// The top array's ref, or [`Ref::null`] if this group has no tables yet.
    #[must_use]
    pub fn root_ref(&self) -> Ref {
        self.top.as_ref().map_or_else(Ref::null, Array::ref_)
    }

    /// `true` if this group's free list carries per-entry reader versions.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// The top array, for the committer to read auxiliary slots from.
    pub(crate) fn top_array(&self) -> Option<&Array> {
        self.top.as_ref()
    }

    /// The top array, for the committer to rewrite auxiliary slots on.
    pub(crate) fn top_array_mut(&mut self) -> Option<&mut Array> {
        self.top.as_mut()
    }

    /// Replaces the bound top array outright; used by the committer once it
    /// has assembled the final, freshly-written top array for a commit.
    pub(crate) fn set_top_array(&mut self, top: Array) {
        self.top = Some(top);
    }

    /// Number of tables in the catalogue.
    pub fn table_count(&self, alloc: &Allocator) -> Result<u32> {
        match &self.top {
            None => Ok(0),
            Some(top) => Ok(tables_array(alloc, top)?.size()),
        }
    }

    /// The name of table `i`.
    pub fn table_name(&self, alloc: &Allocator, i: u32) -> Result<String> {
        let top = self.top.as_ref().ok_or(Error::NoSuchTable)?;
        let names = names_array(alloc, top)?;
        if i >= names.size() {
            return Err(Error::NoSuchTable);
        }
        read_string(alloc, &names, i)
    }

    /// `true` if a table named `name` exists.
    pub fn has_table(&self, alloc: &Allocator, name: &str) -> Result<bool> {
        Ok(self.find_table(alloc, name)?.is_some())
    }

    fn find_table(&self, alloc: &Allocator, name: &str) -> Result<Option<u32>> {
        let Some(top) = &self.top else {
            return Ok(None);
        };
        let names = names_array(alloc, top)?;
        for i in 0..names.size() {
            if read_string(alloc, &names, i)? == name {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Binds to an existing table by name.
    pub fn get_table(&self, alloc: &Allocator, name: &str) -> Result<Table> {
        let top = self.top.as_ref().ok_or(Error::NoSuchTable)?;
        let i = self.find_table(alloc, name)?.ok_or(Error::NoSuchTable)?;
        let tables = tables_array(alloc, top)?;
        let table_ref = match tables.get_tagged(alloc, i)? {
            Tagged::Ref(r) => r,
            Tagged::Literal(_) => return Err(Error::CorruptedFile("tables slot is not a ref")),
        };
        Table::from_ref(alloc, table_ref)
    }

    /// Writes `table`'s (possibly copy-on-written) ref back into the
    /// catalogue after the caller has mutated it.
    pub fn put_table(&mut self, alloc: &mut Allocator, name: &str, table: &Table) -> Result<()> {
        let i = self.find_table(alloc, name)?.ok_or(Error::NoSuchTable)?;
        let top = self.top.as_mut().expect("find_table succeeded so top exists");
        let mut tables = tables_array(alloc, top)?;
        tables.set_tagged(alloc, i, Tagged::Ref(table.ref_()))?;
        top.set_tagged(alloc, 1, Tagged::Ref(tables.ref_()))
    }

    /// Creates a new, empty table and appends it to the catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyAlreadyUsed`] if a table named `name` already exists.
    pub fn add_table(&mut self, alloc: &mut Allocator, name: &str, column_types: Vec<ColumnType>) -> Result<Table> {
        if self.has_table(alloc, name)? {
            return Err(Error::KeyAlreadyUsed);
        }

        let table = Table::create_empty(alloc, column_types)?;

        if self.top.is_none() {
            self.top = Some(self.create_fresh_top(alloc)?);
        }
        let top = self.top.as_mut().expect("just ensured Some");

        let mut names = names_array(alloc, top)?;
        let name_blob = write_string(alloc, name)?;
        names.push_raw(alloc, Tagged::Ref(name_blob.ref_()).to_raw())?;
        top.set_tagged(alloc, 0, Tagged::Ref(names.ref_()))?;

        let mut tables = tables_array(alloc, top)?;
        tables.push_raw(alloc, Tagged::Ref(table.ref_()).to_raw())?;
        top.set_tagged(alloc, 1, Tagged::Ref(tables.ref_()))?;

        Ok(table)
    }

    fn create_fresh_top(&self, alloc: &mut Allocator) -> Result<Array> {
        let names = Array::create_refs(alloc, false, 0)?;
        let tables = Array::create_refs(alloc, false, 0)?;
        let free_positions = Array::create(alloc, WType::Multiply, Width::W64, false, false, 0, 0)?;
        let free_lengths = Array::create(alloc, WType::Multiply, Width::W64, false, false, 0, 0)?;

        let size = if self.is_shared { SHARED_TOP_SIZE } else { UNSHARED_TOP_SIZE };
        let mut top = Array::create_refs(alloc, false, size)?;
        top.set_tagged(alloc, 0, Tagged::Ref(names.ref_()))?;
        top.set_tagged(alloc, 1, Tagged::Ref(tables.ref_()))?;
        top.set_tagged(alloc, 2, Tagged::Literal(0))?;
        top.set_tagged(alloc, 3, Tagged::Ref(free_positions.ref_()))?;
        top.set_tagged(alloc, 4, Tagged::Ref(free_lengths.ref_()))?;

        if self.is_shared {
            let free_versions = Array::create(alloc, WType::Multiply, Width::W64, false, false, 0, 0)?;
            top.set_tagged(alloc, 5, Tagged::Ref(free_versions.ref_()))?;
            top.set_tagged(alloc, 6, Tagged::Literal(0))?;
        }

        Ok(top)
    }
}

fn names_array(alloc: &Allocator, top: &Array) -> Result<Array> {
    match top.get_tagged(alloc, 0)? {
        Tagged::Ref(r) => Array::init_from_ref(alloc, r),
        Tagged::Literal(_) => Err(Error::CorruptedFile("table_names slot is not a ref")),
    }
}

fn tables_array(alloc: &Allocator, top: &Array) -> Result<Array> {
    match top.get_tagged(alloc, 1)? {
        Tagged::Ref(r) => Array::init_from_ref(alloc, r),
        Tagged::Literal(_) => Err(Error::CorruptedFile("tables slot is not a ref")),
    }
}

fn write_string(alloc: &mut Allocator, s: &str) -> Result<Array> {
    let bytes = s.as_bytes();
    let mut blob = Array::create(alloc, WType::Ignore, Width::W8, false, false, bytes.len() as u32, 0)?;
    for (i, b) in bytes.iter().enumerate() {
        blob.set_raw(alloc, i as u32, u64::from(*b))?;
    }
    Ok(blob)
}

fn read_string(alloc: &Allocator, names: &Array, i: u32) -> Result<String> {
    let blob_ref = match names.get_tagged(alloc, i)? {
        Tagged::Ref(r) => r,
        Tagged::Literal(_) => return Err(Error::CorruptedFile("table name slot is not a ref")),
    };
    let blob = Array::init_from_ref(alloc, blob_ref)?;

    let mut bytes = Vec::with_capacity(blob.size() as usize);
    for i in 0..blob.size() {
        bytes.push(blob.get_raw(alloc, i)? as u8);
    }
    String::from_utf8(bytes).map_err(|_| Error::CorruptedFile("table name is not valid utf8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Mapping;
    use std::sync::Arc;
    use test_log::test;

    struct EmptyMapping;
    impl Mapping for EmptyMapping {
        fn len(&self) -> u64 {
            0
        }
        fn slice(&self, _offset: u64, _len: u64) -> Result<&[u8]> {
            Err(Error::CorruptedFile("empty mapping"))
        }
    }

    fn fresh_allocator() -> Allocator {
        Allocator::new(0, Arc::new(EmptyMapping))
    }

    #[test]
    fn empty_group_has_no_tables() {
        let alloc = fresh_allocator();
        let group = Group::empty(false);
        assert_eq!(0, group.table_count(&alloc).unwrap());
        assert!(!group.has_table(&alloc, "people").unwrap());
        assert!(group.root_ref().is_null());
    }

    #[test]
    fn add_table_then_find_by_name() {
        let mut alloc = fresh_allocator();
        let mut group = Group::empty(false);
        group.add_table(&mut alloc, "people", vec![ColumnType::Int]).unwrap();

        assert_eq!(1, group.table_count(&alloc).unwrap());
        assert_eq!("people", group.table_name(&alloc, 0).unwrap());
        assert!(group.has_table(&alloc, "people").unwrap());

        let table = group.get_table(&alloc, "people").unwrap();
        assert_eq!(1, table.column_count());
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let mut alloc = fresh_allocator();
        let mut group = Group::empty(false);
        group.add_table(&mut alloc, "people", vec![ColumnType::Int]).unwrap();
        assert!(matches!(
            group.add_table(&mut alloc, "people", vec![ColumnType::Bool]),
            Err(Error::KeyAlreadyUsed)
        ));
    }

    #[test]
    fn put_table_persists_mutation_after_cow() {
        use crate::cluster::Value;
        use crate::key::Key;

        let mut alloc = fresh_allocator();
        let mut group = Group::empty(false);
        let mut table = group.add_table(&mut alloc, "people", vec![ColumnType::Int]).unwrap();

        table.cluster_mut().insert(&mut alloc, Key::new(1), vec![Value::Int(9)]).unwrap();
        table.sync(&mut alloc).unwrap();
        group.put_table(&mut alloc, "people", &table).unwrap();

        let reopened = group.get_table(&alloc, "people").unwrap();
        assert_eq!(1, reopened.cluster().size());
    }
}
