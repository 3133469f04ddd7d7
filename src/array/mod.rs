// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

pub mod header;
pub mod width;

pub use header::{ArrayHeader, HEADER_SIZE};
pub use width::{WType, Width};

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::ref_::{Ref, Tagged};

/// Identifies an array's slot inside its parent, so that a reallocation
/// (copy-on-write or width upgrade) can be propagated upward.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParentLink {
    pub ref_: Ref,
    pub index: u32,
}

/// An accessor bound to an array's header at some [`Ref`].
///
/// Owns no persistent state of its own: every read or write goes through an
/// [`Allocator`], which resolves `ref_` to either mapped-file bytes or slab
/// memory. Mutating an array whose ref is still in the baseline zone
/// triggers copy-on-write, after which `ref_` points at the freshly
/// allocated slab copy.
#[derive(Clone, Debug)]
pub struct Array {
    ref_: Ref,
    header: ArrayHeader,
    parent: Option<ParentLink>,
}

fn unpack_elements(bytes: &[u8], header: &ArrayHeader) -> Vec<u64> {
    let mut out = Vec::with_capacity(header.size as usize);

    match header.wtype {
        WType::Ignore => {
            for i in 0..header.size as usize {
                out.push(u64::from(bytes[i]));
            }
        }
        WType::Multiply => {
            let width_bytes = usize::from(header.width.bits() / 8).max(1);
            for i in 0..header.size as usize {
                let start = i * width_bytes;
                let mut buf = [0_u8; 8];
                buf[..width_bytes].copy_from_slice(&bytes[start..start + width_bytes]);
                out.push(u64::from_le_bytes(buf));
            }
        }
        WType::Bits => {
            let bits = u64::from(header.width.bits());
            if bits == 0 {
                out.resize(header.size as usize, 0);
            } else {
                for i in 0..header.size as usize {
                    let bit_start = i as u64 * bits;
                    let byte_start = (bit_start / 8) as usize;
                    let bit_offset = bit_start % 8;

                    // A value up to 64 bits at an arbitrary bit offset spans
                    // at most 9 bytes; widen to u128 to read it in one go.
                    let mut buf = [0_u8; 16];
                    let avail = bytes.len().saturating_sub(byte_start);
                    let take = avail.min(16);
                    buf[..take].copy_from_slice(&bytes[byte_start..byte_start + take]);
                    let raw = u128::from_le_bytes(buf);

                    let mask = if bits == 64 { u64::MAX } else { (1_u64 << bits) - 1 };
                    out.push(((raw >> bit_offset) & u128::from(mask)) as u64);
                }
            }
        }
    }

    out
}

fn pack_elements(elements: &[u64], wtype: WType, width: Width) -> Vec<u8> {
    match wtype {
        WType::Ignore => elements.iter().map(|&v| v as u8).collect(),
        WType::Multiply => {
            let width_bytes = usize::from(width.bits() / 8).max(1);
            let mut out = vec![0_u8; elements.len() * width_bytes];
            for (i, &v) in elements.iter().enumerate() {
                let bytes = v.to_le_bytes();
                out[i * width_bytes..(i + 1) * width_bytes].copy_from_slice(&bytes[..width_bytes]);
            }
            out
        }
        WType::Bits => {
            let bits = u64::from(width.bits());
            if bits == 0 {
                return Vec::new();
            }
            let total_bits = bits * elements.len() as u64;
            let mut out = vec![0_u8; total_bits.div_ceil(8) as usize];
            for (i, &v) in elements.iter().enumerate() {
                let bit_start = i as u64 * bits;
                let mask = if bits == 64 { u64::MAX } else { (1_u64 << bits) - 1 };
                let v = v & mask;
                let mut remaining_bits = bits;
                let mut shift = 0_u64;
                let mut pos = bit_start;
                while remaining_bits > 0 {
                    let byte_idx = (pos / 8) as usize;
                    let bit_in_byte = pos % 8;
                    let free_in_byte = 8 - bit_in_byte;
                    let take = remaining_bits.min(free_in_byte);
                    let chunk_mask = (1_u64 << take) - 1;
                    let chunk = (v >> shift) & chunk_mask;
                    out[byte_idx] |= (chunk as u8) << bit_in_byte;
                    pos += take;
                    shift += take;
                    remaining_bits -= take;
                }
            }
            out
        }
    }
}

impl Array {
    /// Binds an accessor to the array header at `r`.
    pub fn init_from_ref(alloc: &Allocator, r: Ref) -> Result<Self> {
        let bytes = alloc.read(r, HEADER_SIZE as u32)?;
        let mut raw = [0_u8; HEADER_SIZE];
        raw.copy_from_slice(bytes);
        let header = ArrayHeader::decode(&raw)?;
        Ok(Self { ref_: r, header, parent: None })
    }

    /// Allocates and initializes a new array.
    pub fn create(
        alloc: &mut Allocator,
        wtype: WType,
        width: Width,
        has_refs: bool,
        is_inner_bptree_node: bool,
        size: u32,
        init_raw: u64,
    ) -> Result<Self> {
        let elements = vec![init_raw; size as usize];
        let payload = pack_elements(&elements, wtype, width);
        let capacity = (HEADER_SIZE as u32 + payload.len() as u32 + 7) & !7;

        let header = ArrayHeader {
            is_inner_bptree_node,
            has_refs,
            context_flag: false,
            wtype,
            width,
            size,
            capacity,
        };

        let r = alloc.alloc(capacity)?;
        let buf = alloc.read_mut(r, capacity)?;
        buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);

        Ok(Self { ref_: r, header, parent: None })
    }

    /// Convenience constructor for a `has_refs` array (always stored at
    /// 64-bit width so it can hold either a [`Ref`] or a tagged literal).
    pub fn create_refs(alloc: &mut Allocator, is_inner_bptree_node: bool, size: u32) -> Result<Self> {
        Self::create(alloc, WType::Multiply, Width::W64, true, is_inner_bptree_node, size, Tagged::Literal(0).to_raw())
    }

    #[must_use]
    pub fn ref_(&self) -> Ref {
        self.ref_
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.header.size
    }

    #[must_use]
    pub fn has_refs(&self) -> bool {
        self.header.has_refs
    }

    #[must_use]
    pub fn is_inner_bptree_node(&self) -> bool {
        self.header.is_inner_bptree_node
    }

    #[must_use]
    pub fn context_flag(&self) -> bool {
        self.header.context_flag
    }

    pub fn set_context_flag(&mut self, alloc: &mut Allocator, value: bool) -> Result<()> {
        self.header.context_flag = value;
        self.write_header(alloc)
    }

    /// Records which array and slot owns this one, so a reallocation here can
    /// update that one slot. Multi-level propagation up a
    /// full tree path is the caller's responsibility (see `cluster::Path`).
    pub fn set_parent(&mut self, link: ParentLink) {
        self.parent = Some(link);
    }

    #[must_use]
    pub fn parent(&self) -> Option<ParentLink> {
        self.parent
    }

    fn payload(&self, alloc: &Allocator) -> Result<Vec<u8>> {
        let bytes = alloc.read(self.ref_, self.header.capacity)?;
        Ok(bytes[HEADER_SIZE..].to_vec())
    }

    fn write_header(&self, alloc: &mut Allocator) -> Result<()> {
        let buf = alloc.read_mut(self.ref_, HEADER_SIZE as u32)?;
        buf.copy_from_slice(&self.header.encode());
        Ok(())
    }

    /// Copy-on-write: if `ref_` is still in the baseline zone, allocates a
    /// fresh slab copy and rebinds to it, notifying the parent slot if one is
    /// known.
    fn ensure_writeable(&mut self, alloc: &mut Allocator) -> Result<bool> {
        if alloc.is_writeable(self.ref_) {
            return Ok(false);
        }

        let old_ref = self.ref_;
        let new_ref = alloc.realloc(old_ref, self.header.capacity, self.header.capacity, true)?;
        self.ref_ = new_ref;
        self.notify_parent(alloc)?;
        Ok(true)
    }

    fn notify_parent(&self, alloc: &mut Allocator) -> Result<()> {
        if let Some(link) = self.parent {
            let mut parent = Array::init_from_ref(alloc, link.ref_)?;
            parent.set_tagged(alloc, link.index, Tagged::Ref(self.ref_))?;
        }
        Ok(())
    }

    /// Reallocates this array with a wider element width, re-packing the
    /// existing elements, and re-binds to the new ref.
    fn widen(&mut self, alloc: &mut Allocator, new_width: Width) -> Result<()> {
        let mut elements = unpack_elements(&self.payload(alloc)?, &self.header);
        elements.resize(self.header.size as usize, 0);

        let payload = pack_elements(&elements, self.header.wtype, new_width);
        let new_capacity = (HEADER_SIZE as u32 + payload.len() as u32 + 7) & !7;

        let new_header = ArrayHeader {
            width: new_width,
            capacity: new_capacity,
            ..self.header
        };

        let new_ref = alloc.alloc(new_capacity)?;
        {
            let buf = alloc.read_mut(new_ref, new_capacity)?;
            buf[..HEADER_SIZE].copy_from_slice(&new_header.encode());
            buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);
        }
        alloc.free(self.ref_, self.header.capacity);

        self.ref_ = new_ref;
        self.header = new_header;
        self.notify_parent(alloc)
    }

    fn bounds_check(&self, i: u32) -> Result<()> {
        if i >= self.header.size {
            return Err(Error::CorruptedFile("array index out of bounds"));
        }
        Ok(())
    }

    /// Reads raw element `i`.
    pub fn get_raw(&self, alloc: &Allocator, i: u32) -> Result<u64> {
        self.bounds_check(i)?;
        let payload = self.payload(alloc)?;
        Ok(unpack_elements(&payload, &self.header)[i as usize])
    }

    /// Writes raw element `i`, copy-on-writing and widening as needed.
    pub fn set_raw(&mut self, alloc: &mut Allocator, i: u32, value: u64) -> Result<()> {
        self.bounds_check(i)?;
        self.ensure_writeable(alloc)?;

        if self.header.wtype == WType::Bits {
            let required = self.minimum_width_for(value);
            if required > self.header.width {
                self.widen(alloc, required)?;
            }
        }

        let mut elements = unpack_elements(&self.payload(alloc)?, &self.header);
        elements[i as usize] = value;
        let payload = pack_elements(&elements, self.header.wtype, self.header.width);

        let buf = alloc.read_mut(self.ref_, self.header.capacity)?;
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);

        Ok(())
    }

    fn minimum_width_for(&self, value: u64) -> Width {
        if self.header.wtype != WType::Bits {
            return self.header.width;
        }
        if value == 0 {
            return Width::W0;
        }
        for candidate in [Width::W1, Width::W2, Width::W4, Width::W8, Width::W16, Width::W32, Width::W64] {
            let max = if candidate.bits() == 64 { u64::MAX } else { (1_u64 << candidate.bits()) - 1 };
            if value <= max {
                return candidate;
            }
        }
        Width::W64
    }

    /// Reads a `has_refs` slot, distinguishing a ref from a tagged literal.
    pub fn get_tagged(&self, alloc: &Allocator, i: u32) -> Result<Tagged> {
        debug_assert!(self.header.has_refs);
        Ok(Tagged::from_raw(self.get_raw(alloc, i)?))
    }

    /// Writes a `has_refs` slot.
    pub fn set_tagged(&mut self, alloc: &mut Allocator, i: u32, value: Tagged) -> Result<()> {
        debug_assert!(self.header.has_refs);
        self.set_raw(alloc, i, value.to_raw())
    }

    fn reallocate_with(&mut self, alloc: &mut Allocator, elements: Vec<u64>) -> Result<()> {
        let width = if self.header.wtype == WType::Bits {
            elements
                .iter()
                .fold(Width::W0, |acc, &v| acc.max(self.minimum_width_for(v)))
        } else {
            self.header.width
        };

        let payload = pack_elements(&elements, self.header.wtype, width);
        let new_capacity = (HEADER_SIZE as u32 + payload.len() as u32 + 7) & !7;

        let new_header = ArrayHeader {
            width,
            size: elements.len() as u32,
            capacity: new_capacity,
            ..self.header
        };

        let old_ref = self.ref_;
        let old_capacity = self.header.capacity;

        let new_ref = alloc.alloc(new_capacity)?;
        {
            let buf = alloc.read_mut(new_ref, new_capacity)?;
            buf[..HEADER_SIZE].copy_from_slice(&new_header.encode());
            buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);
        }
        alloc.free(old_ref, old_capacity);

        self.ref_ = new_ref;
        self.header = new_header;
        self.notify_parent(alloc)
    }

    /// Inserts `value` at index `i`, shifting subsequent elements up.
    pub fn insert_raw(&mut self, alloc: &mut Allocator, i: u32, value: u64) -> Result<()> {
        if i > self.header.size {
            return Err(Error::CorruptedFile("insert index out of bounds"));
        }
        let mut elements = unpack_elements(&self.payload(alloc)?, &self.header);
        elements.insert(i as usize, value);
        self.reallocate_with(alloc, elements)
    }

    /// Removes element `i`, shifting subsequent elements down.
    pub fn erase(&mut self, alloc: &mut Allocator, i: u32) -> Result<()> {
        self.bounds_check(i)?;
        let mut elements = unpack_elements(&self.payload(alloc)?, &self.header);
        elements.remove(i as usize);
        self.reallocate_with(alloc, elements)
    }

    /// Shrinks the array to its first `n` elements.
    pub fn truncate(&mut self, alloc: &mut Allocator, n: u32) -> Result<()> {
        if n > self.header.size {
            return Err(Error::CorruptedFile("truncate length exceeds size"));
        }
        let mut elements = unpack_elements(&self.payload(alloc)?, &self.header);
        elements.truncate(n as usize);
        self.reallocate_with(alloc, elements)
    }

    /// Appends `value` (a thin wrapper over `insert_raw` at `size()`).
    pub fn push_raw(&mut self, alloc: &mut Allocator, value: u64) -> Result<()> {
        self.insert_raw(alloc, self.header.size, value)
    }

    /// Releases this array's own allocation (but not any arrays it refs --
    /// callers are responsible for freeing a subtree bottom-up).
    pub fn destroy(self, alloc: &mut Allocator) {
        alloc.free(self.ref_, self.header.capacity);
    }

    /// This array's full on-disk representation (header followed by
    /// payload, padded to `capacity`), for the committer to blit verbatim
    /// into a freshly reserved file range.
    pub fn raw_bytes(&self, alloc: &Allocator) -> Result<Vec<u8>> {
        Ok(alloc.read(self.ref_, self.header.capacity)?.to_vec())
    }

    /// This array's byte size on disk, i.e. its header's `capacity`.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.header.capacity
    }
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
    fn create_and_get_set_bits_array() {
        let mut alloc = fresh_allocator();
        let mut arr = Array::create(&mut alloc, WType::Bits, Width::W1, false, false, 4, 0).unwrap();

        arr.set_raw(&mut alloc, 0, 1).unwrap();
        arr.set_raw(&mut alloc, 2, 1).unwrap();

        assert_eq!(1, arr.get_raw(&alloc, 0).unwrap());
        assert_eq!(0, arr.get_raw(&alloc, 1).unwrap());
        assert_eq!(1, arr.get_raw(&alloc, 2).unwrap());
    }

    #[test]
    fn set_widens_on_overflow() {
        let mut alloc = fresh_allocator();
        let mut arr = Array::create(&mut alloc, WType::Bits, Width::W1, false, false, 2, 0).unwrap();

        arr.set_raw(&mut alloc, 0, 500).unwrap();
        assert_eq!(500, arr.get_raw(&alloc, 0).unwrap());
        assert!(arr.header.width.bits() >= 16);
    }

    #[test]
    fn insert_and_erase() {
        let mut alloc = fresh_allocator();
        let mut arr = Array::create(&mut alloc, WType::Bits, Width::W8, false, false, 0, 0).unwrap();

        arr.push_raw(&mut alloc, 10).unwrap();
        arr.push_raw(&mut alloc, 20).unwrap();
        arr.insert_raw(&mut alloc, 1, 15).unwrap();

        assert_eq!(3, arr.size());
        assert_eq!(vec![10, 15, 20], (0..3).map(|i| arr.get_raw(&alloc, i).unwrap()).collect::<Vec<_>>());

        arr.erase(&mut alloc, 1).unwrap();
        assert_eq!(vec![10, 20], (0..2).map(|i| arr.get_raw(&alloc, i).unwrap()).collect::<Vec<_>>());
    }

    #[test]
    fn truncate_shrinks_size() {
        let mut alloc = fresh_allocator();
        let mut arr = Array::create(&mut alloc, WType::Bits, Width::W8, false, false, 0, 0).unwrap();
        for v in [1, 2, 3, 4] {
            arr.push_raw(&mut alloc, v).unwrap();
        }
        arr.truncate(&mut alloc, 2).unwrap();
        assert_eq!(2, arr.size());
    }

    #[test]
    fn refs_array_roundtrips_ref_and_literal() {
        let mut alloc = fresh_allocator();
        let mut arr = Array::create_refs(&mut alloc, false, 2).unwrap();

        arr.set_tagged(&mut alloc, 0, Tagged::Literal(-7)).unwrap();
        arr.set_tagged(&mut alloc, 1, Tagged::Ref(Ref::new(64))).unwrap();

        assert_eq!(Tagged::Literal(-7), arr.get_tagged(&alloc, 0).unwrap());
        assert_eq!(Tagged::Ref(Ref::new(64)), arr.get_tagged(&alloc, 1).unwrap());
    }

    #[test]
    fn out_of_bounds_get_errors() {
        let mut alloc = fresh_allocator();
        let arr = Array::create(&mut alloc, WType::Bits, Width::W8, false, false, 1, 0).unwrap();
        assert!(arr.get_raw(&alloc, 5).is_err());
    }
}
