// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use std::io::{Read, Write};

/// The type tag of a table column.
///
/// `Mixed` columns carry one of these variants per cell. Nested subtables are
/// intentionally not representable here: the source this design is modeled
/// on treats them as a source of unbounded in-file leaks, so the core
/// refuses to create them. A column discovered on disk with a subtable tag
/// from an older file is surfaced as opaque [`ColumnType::Binary`] and can
/// never be written to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(clippy::module_name_repetitions)]
pub enum ColumnType {
    /// 63-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Arbitrary bytes.
    Binary,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// A key into another table.
    Link,
}

impl ColumnType {
    /// `true` if cells of this type are fixed-width and can be packed
    /// directly into an array leaf without an auxiliary blob.
    #[must_use]
    pub fn is_fixed_width(self) -> bool {
        !matches!(self, Self::String | Self::Binary)
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Int),
            1 => Ok(Self::Bool),
            2 => Ok(Self::Float),
            3 => Ok(Self::Double),
            4 => Ok(Self::String),
            5 => Ok(Self::Binary),
            6 => Ok(Self::Timestamp),
            7 => Ok(Self::Link),
            _ => Err(()),
        }
    }
}

impl From<ColumnType> for u8 {
    fn from(value: ColumnType) -> Self {
        match value {
            ColumnType::Int => 0,
            ColumnType::Bool => 1,
            ColumnType::Float => 2,
            ColumnType::Double => 3,
            ColumnType::String => 4,
            ColumnType::Binary => 5,
            ColumnType::Timestamp => 6,
            ColumnType::Link => 7,
        }
    }
}

impl Encode for ColumnType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&[u8::from(*self)])?;
        Ok(())
    }
}

impl Decode for ColumnType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0; 1];
        reader.read_exact(&mut buf)?;
        Self::try_from(buf[0]).map_err(|()| DecodeError::InvalidTag(("ColumnType", buf[0] as u64)))
    }
}
