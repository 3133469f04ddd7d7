// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::coding::DecodeError;
use crate::file::{FORMAT_STAMP, HEADER_SIZE};

/// The 24-byte file header: two top-ref slots plus a format stamp and
/// select byte occupying the third 8-byte block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileHeader {
    pub top_ref_0: u64,
    pub top_ref_1: u64,
    pub select: u8,
}

impl FileHeader {
    /// The header of a brand new, empty database file.
    #[must_use]
    pub fn fresh() -> Self {
        Self { top_ref_0: 0, top_ref_1: 0, select: 0 }
    }

    /// The top ref currently named authoritative by `select`'s low bit.
    #[must_use]
    pub fn current_top_ref(&self) -> u64 {
        if self.select & 1 == 0 {
            self.top_ref_0
        } else {
            self.top_ref_1
        }
    }

    /// Which 8-byte slot (0 or 1) the *next* commit should write into.
    #[must_use]
    pub fn next_slot(&self) -> u8 {
        (self.select & 1) ^ 1
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0_u8; HEADER_SIZE as usize];
        out[0..8].copy_from_slice(&self.top_ref_0.to_le_bytes());
        out[8..16].copy_from_slice(&self.top_ref_1.to_le_bytes());
        out[16..20].copy_from_slice(&FORMAT_STAMP);
        // bytes 20..23 reserved, left zero
        out[23] = self.select;
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE as usize]) -> Result<Self, DecodeError> {
        if bytes[16..20] != FORMAT_STAMP {
            return Err(DecodeError::InvalidHeader("format stamp mismatch"));
        }

        let mut top_ref_0 = [0_u8; 8];
        top_ref_0.copy_from_slice(&bytes[0..8]);
        let mut top_ref_1 = [0_u8; 8];
        top_ref_1.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            top_ref_0: u64::from_le_bytes(top_ref_0),
            top_ref_1: u64::from_le_bytes(top_ref_1),
            select: bytes[23],
        })
    }
}
