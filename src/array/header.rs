// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use super::width::{WType, Width};
use crate::coding::DecodeError;

/// Size of an array's header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest permitted array allocation, header included.
pub const MAX_CAPACITY: u32 = 16 * 1024 * 1024;

/// The 8-byte self-describing header prefixing every array's payload.
///
/// Byte layout:
/// - byte 0: flag bits 0-2 (`is_inner_bptree_node`, `has_refs`, `context_flag`),
///   bits 3-4 `wtype`, bits 5-7 `width_exp`.
/// - bytes 1..4: `size`, 24-bit little-endian element count.
/// - bytes 4..7: `capacity`, 24-bit little-endian byte size of the allocation.
/// - byte 7: reserved, always zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArrayHeader {
    pub is_inner_bptree_node: bool,
    pub has_refs: bool,
    pub context_flag: bool,
    pub wtype: WType,
    pub width: Width,
    pub size: u32,
    pub capacity: u32,
}

impl ArrayHeader {
    /// A fresh, empty header for a leaf array of the given width/wtype.
    #[must_use]
    pub fn empty(wtype: WType, width: Width, has_refs: bool) -> Self {
        Self {
            is_inner_bptree_node: false,
            has_refs,
            context_flag: false,
            wtype,
            width,
            size: 0,
            capacity: HEADER_SIZE as u32,
        }
    }

    /// Number of payload bytes implied by `size` at this header's width/wtype.
    #[must_use]
    pub fn payload_bytes(&self) -> u32 {
        match self.wtype {
            WType::Bits => {
                let bits = u32::from(self.width.bits()) * self.size;
                bits.div_ceil(8)
            }
            WType::Multiply => u32::from(self.width.bits() / 8).max(1) * self.size,
            WType::Ignore => self.size,
        }
    }

    /// `true` if `capacity` is large enough to hold the current `size`.
    #[must_use]
    pub fn fits_payload(&self) -> bool {
        self.capacity >= HEADER_SIZE as u32 + self.payload_bytes()
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut byte0 = 0_u8;
        if self.is_inner_bptree_node {
            byte0 |= 0b0000_0001;
        }
        if self.has_refs {
            byte0 |= 0b0000_0010;
        }
        if self.context_flag {
            byte0 |= 0b0000_0100;
        }
        byte0 |= (u8::from(self.wtype) & 0b11) << 3;
        byte0 |= (self.width.exponent() & 0b111) << 5;

        let mut out = [0_u8; HEADER_SIZE];
        out[0] = byte0;
        out[1..4].copy_from_slice(&self.size.to_le_bytes()[..3]);
        out[4..7].copy_from_slice(&self.capacity.to_le_bytes()[..3]);
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, DecodeError> {
        let byte0 = bytes[0];

        let wtype = WType::try_from((byte0 >> 3) & 0b11)
            .map_err(|()| DecodeError::InvalidHeader("unknown array wtype"))?;
        let width = Width::from_exponent((byte0 >> 5) & 0b111);

        let mut size_bytes = [0_u8; 4];
        size_bytes[..3].copy_from_slice(&bytes[1..4]);
        let size = u32::from_le_bytes(size_bytes);

        let mut cap_bytes = [0_u8; 4];
        cap_bytes[..3].copy_from_slice(&bytes[4..7]);
        let capacity = u32::from_le_bytes(cap_bytes);

        if capacity > MAX_CAPACITY {
            return Err(DecodeError::InvalidHeader("array capacity exceeds 16 MiB"));
        }
        if capacity % 8 != 0 {
            return Err(DecodeError::InvalidHeader("array capacity not a multiple of 8"));
        }

        let header = Self {
            is_inner_bptree_node: byte0 & 0b0000_0001 != 0,
            has_refs: byte0 & 0b0000_0010 != 0,
            context_flag: byte0 & 0b0000_0100 != 0,
            wtype,
            width,
            size,
            capacity,
        };

        if !header.fits_payload() {
            return Err(DecodeError::InvalidHeader("array capacity too small for size"));
        }

        Ok(header)
    }
}
