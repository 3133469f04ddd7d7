// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

mod free_list;
mod slab;

pub use free_list::{FreeEntry, FreeList};
pub use slab::Slab;

use crate::error::{Error, Result};
use crate::ref_::Ref;
use std::sync::Arc;

/// Smallest slab ever allocated, in bytes.
const MIN_SLAB_SIZE: usize = 256;

/// Read-only access to the baseline zone backing store.
///
/// Implemented by the file mapper (directly, or through the encrypted page
/// layer); kept as a trait so the allocator can be driven against an
/// in-memory stand-in during tests.
pub trait Mapping: Send + Sync {
    /// The mapping's current length in bytes.
    fn len(&self) -> u64;

    /// Borrows `len` bytes starting at `offset`.
    fn slice(&self, offset: u64, len: u64) -> Result<&[u8]>;
}

/// An owned byte buffer used as a transaction's frozen view of storage.
///
/// Captured once, at transaction open, via [`crate::mapper::Storage::snapshot`];
/// after that the writer is free to mutate the live storage during commit
/// without disturbing any reader (or the writer's own in-flight Allocator,
/// which only ever reads through this copy for baseline-zone refs).
pub struct FrozenBytes(Vec<u8>);

impl FrozenBytes {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Mapping for FrozenBytes {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + len as usize;
        self.0.get(start..end).ok_or(Error::CorruptedFile("ref out of snapshot bounds"))
    }
}

/// Partitions ref space into a read-only baseline zone (the mapped file, as
/// observed at transaction start) and a slab zone (in-process memory used by
/// the active write transaction).
pub struct Allocator {
    baseline: u64,
    mapping: Arc<dyn Mapping>,
    slabs: Vec<Slab>,
    free_list: FreeList,
    pending_free: Vec<(u64, u32)>,
    last_slab_size: usize,
}

impl Allocator {
    #[must_use]
    pub fn new(baseline: u64, mapping: Arc<dyn Mapping>) -> Self {
        Self {
            baseline,
            mapping,
            slabs: Vec::new(),
            free_list: FreeList::new(),
            pending_free: Vec::new(),
            last_slab_size: MIN_SLAB_SIZE,
        }
    }

    /// The logical file size observed when this transaction/snapshot began.
    #[must_use]
    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    /// Ranges freed from the baseline zone during the current transaction,
    /// awaiting the committer.
    #[must_use]
    pub fn pending_free(&self) -> &[(u64, u32)] {
        &self.pending_free
    }

    pub fn clear_pending_free(&mut self) {
        self.pending_free.clear();
    }

    /// Discards all slabs and the in-memory free list; used on rollback.
    pub fn discard_slabs(&mut self) {
        self.slabs.clear();
        self.free_list.clear();
        self.pending_free.clear();
        self.last_slab_size = MIN_SLAB_SIZE;
    }

    fn find_slab(&self, r: u64) -> Option<usize> {
        self.slabs.iter().position(|s| s.contains(r))
    }

    fn find_slab_mut(&mut self, r: u64) -> Option<usize> {
        self.slabs.iter().position(|s| s.contains(r))
    }

    /// Translates `r` to a byte slice, reading through the mapping for
    /// baseline refs or through the owning slab otherwise.
    pub fn read(&self, r: Ref, len: u32) -> Result<&[u8]> {
        let offset = r.offset();

        if offset < self.baseline {
            return self.mapping.slice(offset, u64::from(len));
        }

        let idx = self.find_slab(offset).ok_or(Error::CorruptedFile("dangling ref"))?;
        let slab = &self.slabs[idx];
        let start = (offset - slab.ref_begin) as usize;
        let end = start + len as usize;
        slab.bytes.get(start..end).ok_or(Error::CorruptedFile("ref out of slab bounds"))
    }

    /// Translates `r` to a mutable byte slice. Only valid for slab-zone refs;
    /// callers must copy-on-write baseline-zone arrays before mutating them.
    pub fn read_mut(&mut self, r: Ref, len: u32) -> Result<&mut [u8]> {
        let offset = r.offset();

        if offset < self.baseline {
            return Err(Error::ReadOnly);
        }

        let idx = self.find_slab_mut(offset).ok_or(Error::CorruptedFile("dangling ref"))?;
        let slab = &mut self.slabs[idx];
        let start = (offset - slab.ref_begin) as usize;
        let end = start + len as usize;
        slab.bytes.get_mut(start..end).ok_or(Error::CorruptedFile("ref out of slab bounds"))
    }

    /// `true` if `r` lies in the slab zone (and is therefore writeable
    /// in-place under the copy-on-write rule).
    #[must_use]
    pub fn is_writeable(&self, r: Ref) -> bool {
        r.offset() >= self.baseline
    }

    fn grow_slab(&mut self, min_size: usize) -> Result<u64> {
        let size = min_size.max(self.last_slab_size.saturating_mul(2)).max(MIN_SLAB_SIZE);
        let size = (size + 7) & !7; // 8-byte align

        let base = if self.slabs.is_empty() {
            self.baseline.max(self.next_dynamic_base())
        } else {
            self.slabs.last().expect("checked non-empty").ref_end()
        };

        self.slabs.push(Slab::new(base, size));
        self.last_slab_size = size;
        self.free_list.note_slab_start(base);

        if size > min_size {
            self.free_list.insert(FreeEntry {
                ref_begin: base + min_size as u64,
                size: (size - min_size) as u32,
            });
        }

        Ok(base)
    }

    /// The first ref at or above baseline that is 8-byte aligned; the slab
    /// zone always begins here when no slabs exist yet.
    fn next_dynamic_base(&self) -> u64 {
        (self.baseline + 7) & !7
    }

    /// Allocates `size` bytes (rounded up to 8-byte alignment) from the slab
    /// zone, serving from the free list first.
    pub fn alloc(&mut self, size: u32) -> Result<Ref> {
        let size = (size + 7) & !7;

        if let Some(r) = self.free_list.take_first_fit(size) {
            return Ok(Ref::new(r));
        }

        let base = self.grow_slab(size as usize)?;
        Ok(Ref::new(base))
    }

    /// Frees a previously allocated range. Baseline-zone refs are deferred to
    /// the pending-free list for the committer; slab-zone refs return to the
    /// in-memory free list immediately.
    pub fn free(&mut self, r: Ref, size: u32) {
        let offset = r.offset();
        let size = (size + 7) & !7;

        if offset < self.baseline {
            self.pending_free.push((offset, size));
        } else {
            self.free_list.insert(FreeEntry { ref_begin: offset, size });
        }
    }

    /// Allocates a fresh range, optionally copying `old_size` bytes from
    /// `old_ref`, then frees the old range. No in-place
    /// growth is ever attempted.
    pub fn realloc(&mut self, old_ref: Ref, old_size: u32, new_size: u32, do_copy: bool) -> Result<Ref> {
        let new_ref = self.alloc(new_size)?;

        if do_copy {
            let copy_len = old_size.min(new_size);
            let old_bytes = self.read(old_ref, copy_len)?.to_vec();
            self.read_mut(new_ref, copy_len)?.copy_from_slice(&old_bytes);
        }

        self.free(old_ref, old_size);
        Ok(new_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn alloc_is_writeable() {
        let mut alloc = fresh_allocator();
        let r = alloc.alloc(16).unwrap();
        assert!(alloc.is_writeable(r));
    }

    #[test]
    fn alloc_roundtrip_write_read() {
        let mut alloc = fresh_allocator();
        let r = alloc.alloc(16).unwrap();
        alloc.read_mut(r, 16).unwrap().copy_from_slice(&[7; 16]);
        assert_eq!(&[7; 16], alloc.read(r, 16).unwrap());
    }

    #[test]
    fn free_then_alloc_reuses_slab_free_list() {
        let mut alloc = fresh_allocator();
        let r1 = alloc.alloc(32).unwrap();
        alloc.free(r1, 32);
        let r2 = alloc.alloc(16).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn discard_slabs_resets_state() {
        let mut alloc = fresh_allocator();
        let _ = alloc.alloc(64).unwrap();
        alloc.discard_slabs();
        assert!(alloc.pending_free().is_empty());
    }

    /// Regression: freeing the last bytes of an exhausted slab right after
    /// a new slab was grown flush against it must not coalesce the two
    /// into one `FreeEntry` -- that range would span two separate
    /// `Slab::bytes` buffers, and a later `take_first_fit` handing it out
    /// would make `read`/`read_mut` fail with a spurious `CorruptedFile`
    /// even though the allocation is valid.
    #[test]
    fn freeing_across_a_slab_boundary_does_not_coalesce() {
        let mut alloc = fresh_allocator();

        // Requesting exactly the size `grow_slab` would have picked anyway
        // leaves each slab with no leftover free space, so both frees below
        // are ref-adjacent with nothing else in the way.
        let first_size = (MIN_SLAB_SIZE * 2) as u32; // 512, matches 256.max(256*2)
        let r1 = alloc.alloc(first_size).unwrap();
        assert!(alloc.free_list.is_empty());

        let second_size = first_size * 2; // 1024, matches 512.max(512*2)
        let r2 = alloc.alloc(second_size).unwrap();
        assert_eq!(r1.offset() + u64::from(first_size), r2.offset());
        assert!(alloc.free_list.is_empty());

        // Free the whole of the second slab, then the last 16 bytes of the
        // first. The two freed ranges are ref-adjacent across exactly the
        // slab boundary `grow_slab` placed at `r2`.
        alloc.free(r2, second_size);
        alloc.free(Ref::new(r2.offset() - 16), 16);
        assert_eq!(2, alloc.free_list.len());

        // Both freed ranges are independently reusable and readable.
        let r3 = alloc.alloc(16).unwrap();
        assert_eq!(r2.offset() - 16, r3.offset());
        alloc.read(r3, 16).unwrap();

        let r4 = alloc.alloc(second_size).unwrap();
        assert_eq!(r2.offset(), r4.offset());
        alloc.read(r4, second_size).unwrap();
    }

    #[test]
    fn free_of_baseline_ref_is_deferred() {
        struct NonEmptyMapping;
        impl Mapping for NonEmptyMapping {
            fn len(&self) -> u64 {
                4096
            }
            fn slice(&self, _offset: u64, _len: u64) -> Result<&[u8]> {
                Ok(&[0; 16])
            }
        }

        let mut alloc = Allocator::new(4096, Arc::new(NonEmptyMapping));
        alloc.free(Ref::new(128), 16);
        assert_eq!(1, alloc.pending_free().len());
    }
}
