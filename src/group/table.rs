// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::alloc::Allocator;
use crate::array::{Array, WType, Width};
use crate::cluster::Tree;
use crate::column_type::ColumnType;
use crate::error::{Error, Result};
use crate::ref_::{Ref, Tagged};

/// Number of slots in a table's own top array: column types, cluster root, size.
const TABLE_TOP_SIZE: u32 = 3;

/// One table's schema and cluster tree, reachable through a slot of the
/// owning [`super::Group`]'s `tables` array.
///
/// A table's own top array has three slots: a ref to a byte array of column
/// type tags, a ref to the cluster tree's root node, and a tagged literal
/// holding the object count. The cluster tree itself is cached as a [`Tree`]
/// alongside the array so lookups don't re-decode the column types on every
/// access; mutating methods write the cache back into the array before
/// returning.
pub struct Table {
    top: Array,
    tree: Tree,
}

impl Table {
    /// This table's top array ref, as stored in the owning group's `tables` slot.
    #[must_use]
    pub fn ref_(&self) -> Ref {
        self.top.ref_()
    }

    /// Binds to an existing table, validating its top array shape.
    pub fn from_ref(alloc: &Allocator, r: Ref) -> Result<Self> {
        let top = Array::init_from_ref(alloc, r)?;
        if !top.has_refs() || top.size() != TABLE_TOP_SIZE {
            return Err(Error::CorruptedFile("table top array shape mismatch"));
        }

        let column_types = read_column_types(alloc, &top)?;

        let root_ref = match top.get_tagged(alloc, 1)? {
            Tagged::Ref(r) => r,
            Tagged::Literal(_) => return Err(Error::CorruptedFile("table cluster slot is not a ref")),
        };
        let size = match top.get_tagged(alloc, 2)? {
            Tagged::Literal(v) if v >= 0 => v as u32,
            _ => return Err(Error::CorruptedFile("table size slot is not a literal")),
        };

        let tree = Tree::from_parts(root_ref, column_types, size);
        Ok(Self { top, tree })
    }

    /// Creates a fresh, empty table with the given columns.
    pub fn create_empty(alloc: &mut Allocator, column_types: Vec<ColumnType>) -> Result<Self> {
        let tree = Tree::empty(alloc, column_types.clone())?;
        let types_blob = write_column_types(alloc, &column_types)?;

        let mut top = Array::create_refs(alloc, false, TABLE_TOP_SIZE)?;
        top.set_tagged(alloc, 0, Tagged::Ref(types_blob.ref_()))?;
        top.set_tagged(alloc, 1, Tagged::Ref(tree.root_ref()))?;
        top.set_tagged(alloc, 2, Tagged::Literal(0))?;

        Ok(Self { top, tree })
    }

    /// The cached cluster tree.
    #[must_use]
    pub fn cluster(&self) -> &Tree {
        &self.tree
    }

    /// Mutable access to the cached cluster tree.
    ///
    /// Callers must follow a mutation with [`Table::sync`] so the updated
    /// root ref and object count are reflected in the persisted top array.
    pub fn cluster_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> u32 {
        self.tree.column_types().len() as u32
    }

    /// The type of column `i`.
    pub fn column_type(&self, i: u32) -> Result<ColumnType> {
        self.tree.column_types().get(i as usize).copied().ok_or(Error::InvalidColumn)
    }

    /// Number of objects currently stored in this table.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.tree.size()
    }

    /// Appends a new column of type `ty` to every existing row.
    pub fn add_column(&mut self, alloc: &mut Allocator, ty: ColumnType) -> Result<()> {
        let position = self.column_count();
        self.tree.add_column(alloc, position, ty)?;
        self.rewrite_column_types(alloc)?;
        self.sync(alloc)
    }

    /// Removes column `col` from every existing row.
    pub fn remove_column(&mut self, alloc: &mut Allocator, col: u32) -> Result<()> {
        self.tree.remove_column(alloc, col)?;
        self.rewrite_column_types(alloc)?;
        self.sync(alloc)
    }

    /// Writes the cached tree's current root ref and object count back into
    /// the persisted top array.
    pub fn sync(&mut self, alloc: &mut Allocator) -> Result<()> {
        self.top.set_tagged(alloc, 1, Tagged::Ref(self.tree.root_ref()))?;
        self.top.set_tagged(alloc, 2, Tagged::Literal(i64::from(self.tree.size())))
    }

    fn rewrite_column_types(&mut self, alloc: &mut Allocator) -> Result<()> {
        let old_ref = match self.top.get_tagged(alloc, 0)? {
            Tagged::Ref(r) => r,
            Tagged::Literal(_) => return Err(Error::CorruptedFile("table column-types slot is not a ref")),
        };
        Array::init_from_ref(alloc, old_ref)?.destroy(alloc);

        let blob = write_column_types(alloc, self.tree.column_types())?;
        self.top.set_tagged(alloc, 0, Tagged::Ref(blob.ref_()))
    }
}

fn read_column_types(alloc: &Allocator, top: &Array) -> Result<Vec<ColumnType>> {
    let blob_ref = match top.get_tagged(alloc, 0)? {
        Tagged::Ref(r) => r,
        Tagged::Literal(_) => return Err(Error::CorruptedFile("table column-types slot is not a ref")),
    };
    let blob = Array::init_from_ref(alloc, blob_ref)?;

    (0..blob.size())
        .map(|i| {
            let raw = blob.get_raw(alloc, i)? as u8;
            ColumnType::try_from(raw).map_err(|()| Error::CorruptedFile("unknown column type byte"))
        })
        .collect()
}

fn write_column_types(alloc: &mut Allocator, types: &[ColumnType]) -> Result<Array> {
    let mut blob = Array::create(alloc, WType::Ignore, Width::W8, false, false, types.len() as u32, 0)?;
    for (i, ty) in types.iter().enumerate() {
        blob.set_raw(alloc, i as u32, u64::from(u8::from(*ty)))?;
    }
    Ok(blob)
}
