// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// `null_ref`: the distinguished "no array here" ref.
pub const NULL_REF: u64 = 0;

/// Arrays are always 8-byte aligned.
pub const REF_ALIGNMENT: u64 = 8;

/// The byte offset of an array's header inside the logical file, or inside
/// slab-zone address space while a write transaction is in flight.
///
/// Refs are always even (8-byte aligned); this is what lets a `has_refs`
/// array distinguish a ref slot from a tagged literal integer slot purely by
/// inspecting the low bit (see [`Tagged`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ref(u64);

impl Ref {
    /// Wraps a raw offset as a `Ref`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not 8-byte aligned.
    #[must_use]
    pub fn new(offset: u64) -> Self {
        assert_eq!(offset % REF_ALIGNMENT, 0, "ref {offset} is not 8-byte aligned");
        Self(offset)
    }

    /// The distinguished null ref.
    #[must_use]
    pub const fn null() -> Self {
        Self(NULL_REF)
    }

    /// `true` if this is [`Ref::null`].
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == NULL_REF
    }

    /// The raw byte offset.
    #[must_use]
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl From<u64> for Ref {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl Encode for Ref {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.0)?;
        Ok(())
    }
}

impl Decode for Ref {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let offset = reader.read_u64::<LittleEndian>()?;
        if offset % REF_ALIGNMENT != 0 {
            return Err(DecodeError::InvalidHeader("ref not 8-byte aligned"));
        }
        Ok(Self(offset))
    }
}

/// A slot inside a `has_refs` array: either a [`Ref`] to another array, or a
/// literal signed integer tagged inline.
///
/// On disk the tag is the least-significant bit: 0 means the remaining bits
/// are a ref (always even, since refs are 8-aligned); 1 means the remaining
/// bits, arithmetic-shifted right by one, are the literal value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tagged {
    /// A ref to another array.
    Ref(Ref),
    /// An inline literal integer.
    Literal(i64),
}

impl Tagged {
    /// Packs this slot into its raw stored representation.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        match self {
            Self::Ref(r) => r.offset(),
            Self::Literal(v) => (v as u64).wrapping_shl(1) | 1,
        }
    }

    /// Unpacks a raw stored slot value.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        if raw & 1 == 0 {
            Self::Ref(Ref::new(raw))
        } else {
            Self::Literal((raw >> 1) as i64)
        }
    }

    /// `true` if this slot holds a ref (as opposed to a literal).
    #[must_use]
    pub fn is_ref(self) -> bool {
        matches!(self, Self::Ref(_))
    }
}
