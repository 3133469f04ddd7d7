// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Sentinel for "no key".
pub const NULL_KEY: i64 = -1;

/// A 63-bit signed integer identifying an Object within a table.
///
/// Only the low 63 bits are ever meaningful; the sign bit of the backing
/// `i64` is always clear except for [`NULL_KEY`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Key(i64);

impl Key {
    /// Wraps a raw integer as a `Key`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not fit in 63 bits (i.e. the top two bits
    /// disagree), which would alias with the tagged-literal encoding used
    /// for refs-bearing arrays.
    #[must_use]
    pub fn new(value: i64) -> Self {
        assert!(
            value == NULL_KEY || (0..=i64::MAX >> 1).contains(&value),
            "key {value} does not fit in 63 bits"
        );
        Self(value)
    }

    /// The reserved `null_key` value.
    #[must_use]
    pub const fn null() -> Self {
        Self(NULL_KEY)
    }

    /// `true` if this is [`Key::null`].
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == NULL_KEY
    }

    /// The raw integer value.
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    /// Returns this key offset by `base` (used when keys are stored as
    /// cluster-relative deltas).
    #[must_use]
    pub fn offset_by(self, base: i64) -> i64 {
        self.0 - base
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl Encode for Key {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<BigEndian>(self.0)?;
        Ok(())
    }
}

impl Decode for Key {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self(reader.read_i64::<BigEndian>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn null_key_is_minus_one() {
        assert_eq!(-1, Key::null().value());
        assert!(Key::null().is_null());
    }

    #[test]
    fn key_roundtrip() {
        let key = Key::new(42);
        let bytes = key.encode_into_vec();
        let decoded = Key::decode_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    #[should_panic = "does not fit in 63 bits"]
    fn key_rejects_64th_bit() {
        let _ = Key::new(i64::MIN);
    }

    #[test]
    fn key_ordering() {
        assert!(Key::new(1) < Key::new(2));
        assert!(Key::new(0) < Key::new(1));
    }
}
