// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use super::object::{create_column_array_sized, destroy_column, insert_value, read_value, Value};
use crate::alloc::Allocator;
use crate::array::{Array, WType, Width};
use crate::column_type::ColumnType;
use crate::error::{Error, Result};
use crate::ref_::{Ref, Tagged};

/// Maximum objects per cluster leaf.
pub const CLUSTER_CAPACITY: u32 = 256;

/// `max(cluster_capacity / 4, 1)`.
pub const MIN_LEAF_SIZE: u32 = CLUSTER_CAPACITY / 4;

/// A cluster leaf: slot 0 of its backing array is a ref to the `keys` array,
/// slots `1..=column_count` are refs to one column leaf per table column.
///
/// Keys are stored as absolute 63-bit values here, not as deltas from a
/// cluster base key. This is a known deviation, not a resolved design
/// choice: it costs a wider `keys` array per leaf and carries no
/// correctness implications, but it is not what the on-disk format this
/// engine targets actually does. See `DESIGN.md`.
pub struct Leaf {
    slots: Array,
    column_count: u32,
}

impl Leaf {
    /// This leaf's backing array ref.
    #[must_use]
    pub fn ref_(&self) -> Ref {
        self.slots.ref_()
    }

    /// Binds to an existing leaf, validating its shape against `column_count`.
    pub fn from_ref(alloc: &Allocator, r: Ref, column_count: u32) -> Result<Self> {
        let slots = Array::init_from_ref(alloc, r)?;
        if slots.is_inner_bptree_node() || !slots.has_refs() || slots.size() != column_count + 1 {
            return Err(Error::CorruptedFile("leaf slots array shape mismatch"));
        }
        Ok(Self { slots, column_count })
    }

    /// Creates a fresh, empty leaf with one column array per `column_types` entry.
    pub fn create_empty(alloc: &mut Allocator, column_types: &[ColumnType]) -> Result<Self> {
        let mut slots = Array::create_refs(alloc, false, column_types.len() as u32 + 1)?;
        let keys = Array::create(alloc, WType::Bits, Width::W0, false, false, 0, 0)?;
        slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;

        for (i, ty) in column_types.iter().enumerate() {
            let col = create_column_array_sized(alloc, *ty, 0)?;
            slots.set_tagged(alloc, i as u32 + 1, Tagged::Ref(col.ref_()))?;
        }

        Ok(Self { slots, column_count: column_types.len() as u32 })
    }

    fn keys(&self, alloc: &Allocator) -> Result<Array> {
        match self.slots.get_tagged(alloc, 0)? {
            Tagged::Ref(r) => Array::init_from_ref(alloc, r),
            Tagged::Literal(_) => Err(Error::CorruptedFile("leaf keys slot is not a ref")),
        }
    }

    fn column(&self, alloc: &Allocator, c: u32) -> Result<Array> {
        match self.slots.get_tagged(alloc, c + 1)? {
            Tagged::Ref(r) => Array::init_from_ref(alloc, r),
            Tagged::Literal(_) => Err(Error::CorruptedFile("leaf column slot is not a ref")),
        }
    }

    /// Number of rows currently stored in this leaf.
    pub fn size(&self, alloc: &Allocator) -> Result<u32> {
        Ok(self.keys(alloc)?.size())
    }

    /// The key stored at row `idx`.
    pub fn key_at(&self, alloc: &Allocator, idx: u32) -> Result<i64> {
        Ok(self.keys(alloc)?.get_raw(alloc, idx)? as i64)
    }

    /// All keys in this leaf, in order.
    pub fn keys_vec(&self, alloc: &Allocator) -> Result<Vec<i64>> {
        let keys = self.keys(alloc)?;
        (0..keys.size()).map(|i| keys.get_raw(alloc, i).map(|v| v as i64)).collect()
    }

    /// `Ok(idx)` if `key` is present, `Err(insertion_point)` otherwise.
    pub fn find(&self, alloc: &Allocator, key: i64) -> Result<std::result::Result<u32, u32>> {
        let keys = self.keys_vec(alloc)?;
        let pos = crate::binary_search::partition_point(&keys, |&k| k < key) as u32;
        if (pos as usize) < keys.len() && keys[pos as usize] == key {
            Ok(Ok(pos))
        } else {
            Ok(Err(pos))
        }
    }

    /// Reads column `col` of row `idx`.
    pub fn get_value(&self, alloc: &Allocator, idx: u32, col: u32, ty: ColumnType) -> Result<Value> {
        let column = self.column(alloc, col)?;
        read_value(alloc, &column, idx, ty)
    }

    /// Overwrites column `col` of an existing row `idx`.
    pub fn set_value(&mut self, alloc: &mut Allocator, idx: u32, col: u32, ty: ColumnType, value: &Value) -> Result<()> {
        let mut column = self.column(alloc, col)?;
        super::object::write_value(alloc, &mut column, idx, ty, value)?;
        self.slots.set_tagged(alloc, col + 1, Tagged::Ref(column.ref_()))?;
        Ok(())
    }

    /// Inserts a new row at `idx`, shifting subsequent rows up.
    pub fn insert_row(
        &mut self,
        alloc: &mut Allocator,
        idx: u32,
        key: i64,
        values: &[Value],
        column_types: &[ColumnType],
    ) -> Result<()> {
        let mut keys = self.keys(alloc)?;
        keys.insert_raw(alloc, idx, key as u64)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;

        for (c, ty) in column_types.iter().enumerate() {
            let mut column = self.column(alloc, c as u32)?;
            insert_value(alloc, &mut column, idx, *ty, &values[c])?;
            self.slots.set_tagged(alloc, c as u32 + 1, Tagged::Ref(column.ref_()))?;
        }

        Ok(())
    }

    /// Removes row `idx`, shifting subsequent rows down.
    pub fn erase_row(&mut self, alloc: &mut Allocator, idx: u32) -> Result<()> {
        let mut keys = self.keys(alloc)?;
        keys.erase(alloc, idx)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;

        for c in 0..self.column_count {
            let mut column = self.column(alloc, c)?;
            column.erase(alloc, idx)?;
            self.slots.set_tagged(alloc, c + 1, Tagged::Ref(column.ref_()))?;
        }

        Ok(())
    }

    /// Moves `[split_at, size)` into a freshly created sibling leaf, leaving
    /// `self` holding `[0, split_at)`.
    pub fn split_off(&mut self, alloc: &mut Allocator, split_at: u32, column_types: &[ColumnType]) -> Result<Leaf> {
        let size = self.size(alloc)?;
        let mut sibling = Leaf::create_empty(alloc, column_types)?;

        for idx in split_at..size {
            let key = self.key_at(alloc, idx)?;
            let values = column_types
                .iter()
                .enumerate()
                .map(|(c, ty)| self.get_value(alloc, idx, c as u32, *ty))
                .collect::<Result<Vec<_>>>()?;
            sibling.insert_row(alloc, idx - split_at, key, &values, column_types)?;
        }

        let mut keys = self.keys(alloc)?;
        keys.truncate(alloc, split_at)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;

        for c in 0..self.column_count {
            let mut column = self.column(alloc, c)?;
            column.truncate(alloc, split_at)?;
            self.slots.set_tagged(alloc, c + 1, Tagged::Ref(column.ref_()))?;
        }

        Ok(sibling)
    }

    /// Appends every row of `other` onto the end of `self`, then destroys `other`.
    pub fn merge_from(&mut self, alloc: &mut Allocator, other: Leaf, column_types: &[ColumnType]) -> Result<()> {
        let base = self.size(alloc)?;
        let other_size = other.size(alloc)?;

        for idx in 0..other_size {
            let key = other.key_at(alloc, idx)?;
            let values = column_types
                .iter()
                .enumerate()
                .map(|(c, ty)| other.get_value(alloc, idx, c as u32, *ty))
                .collect::<Result<Vec<_>>>()?;
            self.insert_row(alloc, base + idx, key, &values, column_types)?;
        }

        other.destroy(alloc)
    }

    /// Inserts a new, all-null column array at `position`.
    pub fn add_column(&mut self, alloc: &mut Allocator, position: u32, ty: ColumnType, size: u32) -> Result<()> {
        let col = create_column_array_sized(alloc, ty, size)?;
        self.slots.insert_raw(alloc, position + 1, Tagged::Ref(col.ref_()).to_raw())?;
        self.column_count += 1;
        Ok(())
    }

    /// Destroys and removes the column array at `position`.
    pub fn remove_column(&mut self, alloc: &mut Allocator, position: u32) -> Result<()> {
        let col = self.column(alloc, position)?;
        destroy_column(alloc, col)?;
        self.slots.erase(alloc, position + 1)?;
        self.column_count -= 1;
        Ok(())
    }

    /// Frees this leaf's arrays, including every column and any blobs they ref.
    pub fn destroy(self, alloc: &mut Allocator) -> Result<()> {
        let keys = self.keys(alloc)?;
        for c in 0..self.column_count {
            let col = self.column(alloc, c)?;
            destroy_column(alloc, col)?;
        }
        keys.destroy(alloc);
        self.slots.destroy(alloc);
        Ok(())
    }
}

/// Moves `src`'s first row onto the end of `dst`.
pub(super) fn move_first_row(
    alloc: &mut Allocator,
    src: &mut Leaf,
    dst: &mut Leaf,
    column_types: &[ColumnType],
) -> Result<()> {
    let key = src.key_at(alloc, 0)?;
    let values = column_types
        .iter()
        .enumerate()
        .map(|(c, ty)| src.get_value(alloc, 0, c as u32, *ty))
        .collect::<Result<Vec<_>>>()?;
    src.erase_row(alloc, 0)?;
    let dst_size = dst.size(alloc)?;
    dst.insert_row(alloc, dst_size, key, &values, column_types)
}

/// Moves `src`'s last row onto the front of `dst`.
pub(super) fn move_last_row(
    alloc: &mut Allocator,
    src: &mut Leaf,
    dst: &mut Leaf,
    column_types: &[ColumnType],
) -> Result<()> {
    let idx = src.size(alloc)? - 1;
    let key = src.key_at(alloc, idx)?;
    let values = column_types
        .iter()
        .enumerate()
        .map(|(c, ty)| src.get_value(alloc, idx, c as u32, *ty))
        .collect::<Result<Vec<_>>>()?;
    src.erase_row(alloc, idx)?;
    dst.insert_row(alloc, 0, key, &values, column_types)
}
