// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::alloc::Allocator;
use crate::array::{Array, WType, Width};
use crate::column_type::ColumnType;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::ref_::Tagged;

/// A column value, read out of or written into a cluster leaf.
///
/// A sum type is used here instead of per-type generics: each variant
/// corresponds to one [`crate::column_type::ColumnType`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value in a nullable column.
    Null,
    /// A 63-bit signed integer cell.
    Int(i64),
    /// A boolean cell.
    Bool(bool),
    /// A 32-bit float cell.
    Float(f32),
    /// A 64-bit float cell.
    Double(f64),
    /// A UTF-8 string cell.
    String(String),
    /// An arbitrary-bytes cell.
    Binary(Vec<u8>),
    /// A milliseconds-since-epoch timestamp cell.
    Timestamp(i64),
    /// A link to another table's row.
    Link(Key),
}

/// Sentinel marking a null fixed-width value. `i64::MIN` is reserved and can
/// never be stored as a real `Int`/`Timestamp`/`Link` value; see
/// `DESIGN.md`.
const NULL_INT_SENTINEL: u64 = i64::MIN as u64;
const NULL_BOOL_SENTINEL: u64 = 2;

pub(crate) fn create_column_array_sized(alloc: &mut Allocator, ty: ColumnType, size: u32) -> Result<Array> {
    match ty {
        ColumnType::String | ColumnType::Binary => {
            Array::create(alloc, WType::Multiply, Width::W64, true, false, size, Tagged::Literal(0).to_raw())
        }
        ColumnType::Bool => Array::create(alloc, WType::Bits, Width::W2, false, false, size, NULL_BOOL_SENTINEL),
        ColumnType::Int | ColumnType::Timestamp | ColumnType::Link => {
            Array::create(alloc, WType::Multiply, Width::W64, false, false, size, NULL_INT_SENTINEL)
        }
        ColumnType::Float => {
            Array::create(alloc, WType::Multiply, Width::W32, false, false, size, u64::from(f32::NAN.to_bits()))
        }
        ColumnType::Double => Array::create(alloc, WType::Multiply, Width::W64, false, false, size, f64::NAN.to_bits()),
    }
}

fn blob_bytes(alloc: &Allocator, blob: &Array) -> Result<Vec<u8>> {
    (0..blob.size()).map(|i| blob.get_raw(alloc, i).map(|v| v as u8)).collect()
}

fn create_blob(alloc: &mut Allocator, bytes: &[u8]) -> Result<Array> {
    let mut blob = Array::create(alloc, WType::Ignore, Width::W8, false, false, bytes.len() as u32, 0)?;
    for (i, &b) in bytes.iter().enumerate() {
        blob.set_raw(alloc, i as u32, u64::from(b))?;
    }
    Ok(blob)
}

pub(crate) fn read_value(alloc: &Allocator, col: &Array, idx: u32, ty: ColumnType) -> Result<Value> {
    match ty {
        ColumnType::Int => {
            let raw = col.get_raw(alloc, idx)? as i64;
            Ok(if raw == i64::MIN { Value::Null } else { Value::Int(raw) })
        }
        ColumnType::Timestamp => {
            let raw = col.get_raw(alloc, idx)? as i64;
            Ok(if raw == i64::MIN { Value::Null } else { Value::Timestamp(raw) })
        }
        ColumnType::Link => {
            let raw = col.get_raw(alloc, idx)? as i64;
            Ok(if raw == i64::MIN { Value::Null } else { Value::Link(Key::new(raw)) })
        }
        ColumnType::Bool => {
            let raw = col.get_raw(alloc, idx)?;
            Ok(if raw == NULL_BOOL_SENTINEL { Value::Null } else { Value::Bool(raw != 0) })
        }
        ColumnType::Float => {
            let bits = col.get_raw(alloc, idx)? as u32;
            let f = f32::from_bits(bits);
            Ok(if f.is_nan() { Value::Null } else { Value::Float(f) })
        }
        ColumnType::Double => {
            let bits = col.get_raw(alloc, idx)?;
            let f = f64::from_bits(bits);
            Ok(if f.is_nan() { Value::Null } else { Value::Double(f) })
        }
        ColumnType::String => match col.get_tagged(alloc, idx)? {
            Tagged::Literal(0) => Ok(Value::Null),
            Tagged::Ref(r) => {
                let blob = Array::init_from_ref(alloc, r)?;
                let bytes = blob_bytes(alloc, &blob)?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| Error::CorruptedFile("string column holds invalid utf-8"))
            }
            Tagged::Literal(_) => Err(Error::CorruptedFile("string column slot neither null nor ref")),
        },
        ColumnType::Binary => match col.get_tagged(alloc, idx)? {
            Tagged::Literal(0) => Ok(Value::Null),
            Tagged::Ref(r) => {
                let blob = Array::init_from_ref(alloc, r)?;
                Ok(Value::Binary(blob_bytes(alloc, &blob)?))
            }
            Tagged::Literal(_) => Err(Error::CorruptedFile("binary column slot neither null nor ref")),
        },
    }
}

fn encode_fixed_width(ty: ColumnType, value: &Value) -> Result<u64> {
    match (ty, value) {
        (ColumnType::Int, Value::Int(v)) => Ok(*v as u64),
        (ColumnType::Int, Value::Null) => Ok(NULL_INT_SENTINEL),
        (ColumnType::Timestamp, Value::Timestamp(v)) => Ok(*v as u64),
        (ColumnType::Timestamp, Value::Null) => Ok(NULL_INT_SENTINEL),
        (ColumnType::Link, Value::Link(k)) => Ok(k.value() as u64),
        (ColumnType::Link, Value::Null) => Ok(NULL_INT_SENTINEL),
        (ColumnType::Bool, Value::Bool(b)) => Ok(u64::from(*b)),
        (ColumnType::Bool, Value::Null) => Ok(NULL_BOOL_SENTINEL),
        (ColumnType::Float, Value::Float(f)) => Ok(u64::from(f.to_bits())),
        (ColumnType::Float, Value::Null) => Ok(u64::from(f32::NAN.to_bits())),
        (ColumnType::Double, Value::Double(f)) => Ok(f.to_bits()),
        (ColumnType::Double, Value::Null) => Ok(f64::NAN.to_bits()),
        _ => Err(Error::InvalidColumn),
    }
}

/// Inserts a new slot at `idx` in a column leaf.
pub(crate) fn insert_value(alloc: &mut Allocator, col: &mut Array, idx: u32, ty: ColumnType, value: &Value) -> Result<()> {
    match ty {
        ColumnType::String | ColumnType::Binary => {
            let raw = match value {
                Value::Null => Tagged::Literal(0).to_raw(),
                Value::String(s) => Tagged::Ref(create_blob(alloc, s.as_bytes())?.ref_()).to_raw(),
                Value::Binary(b) => Tagged::Ref(create_blob(alloc, b)?.ref_()).to_raw(),
                _ => return Err(Error::InvalidColumn),
            };
            col.insert_raw(alloc, idx, raw)
        }
        _ => col.insert_raw(alloc, idx, encode_fixed_width(ty, value)?),
    }
}

/// Overwrites an existing slot at `idx`, freeing a previous
/// string/binary blob if one was there.
pub(crate) fn write_value(alloc: &mut Allocator, col: &mut Array, idx: u32, ty: ColumnType, value: &Value) -> Result<()> {
    match ty {
        ColumnType::String | ColumnType::Binary => {
            if let Tagged::Ref(old) = col.get_tagged(alloc, idx)? {
                let old_blob = Array::init_from_ref(alloc, old)?;
                old_blob.destroy(alloc);
            }
            let raw = match value {
                Value::Null => Tagged::Literal(0).to_raw(),
                Value::String(s) => Tagged::Ref(create_blob(alloc, s.as_bytes())?.ref_()).to_raw(),
                Value::Binary(b) => Tagged::Ref(create_blob(alloc, b)?.ref_()).to_raw(),
                _ => return Err(Error::InvalidColumn),
            };
            col.set_raw(alloc, idx, raw)
        }
        _ => col.set_raw(alloc, idx, encode_fixed_width(ty, value)?),
    }
}

/// Frees a whole column leaf, including any string/binary blobs it refs.
pub(crate) fn destroy_column(alloc: &mut Allocator, col: Array) -> Result<()> {
    if col.has_refs() {
        for i in 0..col.size() {
            if let Tagged::Ref(r) = col.get_tagged(alloc, i)? {
                Array::init_from_ref(alloc, r)?.destroy(alloc);
            }
        }
    }
    col.destroy(alloc);
    Ok(())
}

/// Logical handle to one row: `(Key, row index in leaf, leaf ref)`.
///
/// Carries no cached column data -- every accessor re-reads through the
/// owning [`super::Tree`] and an [`Allocator`], matching "ownership never
/// transfers through an accessor". It does carry the tree's structural
/// version as of the moment it was handed out: every access validates that
/// version first and returns [`Error::StaleAccessor`] if the tree has since
/// split, merged, or otherwise restructured, rather than silently serving a
/// reader through possibly-reclaimed state. Unlike [`super::iter::Iter`],
/// which transparently re-descends on a stale version, an `Object` makes the
/// caller re-fetch explicitly (there is no cached leaf/index here to refresh
/// from -- only the key).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Object {
    /// The object's key within its table.
    pub key: Key,
    version: u64,
}

impl Object {
    /// Wraps a key as a handle at the tree's current version; does not
    /// check the key actually exists.
    #[must_use]
    pub fn new(key: Key, version: u64) -> Self {
        Self { key, version }
    }

    fn validate(&self, tree: &super::Tree) -> Result<()> {
        if self.version == tree.version() {
            Ok(())
        } else {
            Err(Error::StaleAccessor)
        }
    }

    /// Reads column `col` for this object.
    pub fn get(&self, tree: &super::Tree, alloc: &Allocator, col: u32) -> Result<Value> {
        self.validate(tree)?;
        tree.get_value(alloc, self.key, col)
    }

    /// `true` if column `col` holds [`Value::Null`] for this object.
    pub fn is_null(&self, tree: &super::Tree, alloc: &Allocator, col: u32) -> Result<bool> {
        Ok(matches!(self.get(tree, alloc, col)?, Value::Null))
    }
}

/// A writable handle to one row; `set` routes through the owning tree so
/// copy-on-write propagates correctly to the root. Carries the same
/// captured-version staleness check as [`Object`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MutObject {
    /// The object's key within its table.
    pub key: Key,
    version: u64,
}

impl MutObject {
    /// Wraps a key as a writable handle at the tree's current version; does
    /// not check the key actually exists.
    #[must_use]
    pub fn new(key: Key, version: u64) -> Self {
        Self { key, version }
    }

    fn validate(&self, tree: &super::Tree) -> Result<()> {
        if self.version == tree.version() {
            Ok(())
        } else {
            Err(Error::StaleAccessor)
        }
    }

    /// Writes column `col` for this object.
    pub fn set(&self, tree: &mut super::Tree, alloc: &mut Allocator, col: u32, value: Value) -> Result<()> {
        self.validate(tree)?;
        tree.set_value(alloc, self.key, col, value)
    }

    /// Reads column `col` for this object.
    pub fn get(&self, tree: &super::Tree, alloc: &Allocator, col: u32) -> Result<Value> {
        self.validate(tree)?;
        tree.get_value(alloc, self.key, col)
    }
}
