// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::alloc::Allocator;
use crate::array::{Array, WType, Width, HEADER_SIZE as ARRAY_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::file::HEADER_SIZE as FILE_HEADER_SIZE;
use crate::group::Group;
use crate::mapper::Storage;
use crate::ref_::{Ref, Tagged};
use crate::version::Version;

/// File growth is doubled each time more room is needed, capped at this many
/// bytes per extension once the file passes it.
const GROWTH_CAP: u64 = 128 * 1024 * 1024;
const MIN_GROWTH: u64 = 4096;

/// One entry of the on-file free list: a byte range not currently reachable
/// from any table, stamped with the writer version that freed it.
#[derive(Copy, Clone, Debug)]
struct FreeRange {
    position: u64,
    length: u32,
    version: u64,
}

/// The group's on-file free list, held in memory for the duration of a
/// commit so repeated reservations don't round-trip through tiny arrays.
struct OnDiskFreeList {
    entries: Vec<FreeRange>,
    logical_size: u64,
}

impl OnDiskFreeList {
    fn load(alloc: &Allocator, group: &Group) -> Result<Self> {
        let logical_size = alloc.baseline();

        let Some(top) = group.top_array() else {
            return Ok(Self { entries: Vec::new(), logical_size });
        };

        let positions_ref = expect_ref(top.get_tagged(alloc, 3)?, "free_positions")?;
        let lengths_ref = expect_ref(top.get_tagged(alloc, 4)?, "free_lengths")?;
        let positions = Array::init_from_ref(alloc, positions_ref)?;
        let lengths = Array::init_from_ref(alloc, lengths_ref)?;

        let versions = if group.is_shared() {
            Some(Array::init_from_ref(alloc, expect_ref(top.get_tagged(alloc, 5)?, "free_versions")?)?)
        } else {
            None
        };

        let mut entries = Vec::with_capacity(positions.size() as usize);
        for i in 0..positions.size() {
            let position = positions.get_raw(alloc, i)?;
            let length = lengths.get_raw(alloc, i)? as u32;
            let version = match &versions {
                Some(v) => v.get_raw(alloc, i)?,
                None => 0,
            };
            entries.push(FreeRange { position, length, version });
        }

        Ok(Self { entries, logical_size })
    }

    /// Coalesces adjacent entries (commit step 1). In a shared file, two
    /// entries only merge if both are old enough that no live reader could
    /// still be traversing either one.
    fn merge_adjacent(&mut self, is_shared: bool, oldest_live_reader_version: Version) {
        self.entries.sort_by_key(|e| e.position);

        let mut merged: Vec<FreeRange> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if let Some(last) = merged.last_mut() {
                let adjacent = last.position + u64::from(last.length) == entry.position;
                let version_safe = !is_shared || (last.version <= oldest_live_reader_version && entry.version <= oldest_live_reader_version);
                if adjacent && version_safe {
                    last.length += entry.length;
                    continue;
                }
            }
            merged.push(entry);
        }
        self.entries = merged;
    }

    fn insert_sorted(&mut self, entry: FreeRange) {
        let pos = self.entries.partition_point(|e| e.position < entry.position);
        self.entries.insert(pos, entry);
    }

    /// Records a range logically freed during the transaction (commit step 3).
    fn push(&mut self, position: u64, length: u32, version: u64) {
        self.insert_sorted(FreeRange { position, length, version });
    }

    /// Reserves `size` bytes via first-fit, splitting any leftover back into
    /// the list; grows the logical file if no entry is large enough.
    fn reserve(&mut self, size: u32) -> u64 {
        if let Some(idx) = self.entries.iter().position(|e| e.length >= size) {
            let entry = self.entries.remove(idx);
            let leftover = entry.length - size;
            if leftover > 0 {
                self.insert_sorted(FreeRange {
                    position: entry.position + u64::from(size),
                    length: leftover,
                    version: entry.version,
                });
            }
            return entry.position;
        }

        self.extend_and_reserve(size)
    }

    fn tail_entry_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.position + u64::from(e.length) == self.logical_size)
    }

    fn extend_and_reserve(&mut self, size: u32) -> u64 {
        loop {
            if let Some(idx) = self.tail_entry_index() {
                if self.entries[idx].length >= size {
                    let entry = self.entries.remove(idx);
                    let leftover = entry.length - size;
                    if leftover > 0 {
                        self.insert_sorted(FreeRange {
                            position: entry.position + u64::from(size),
                            length: leftover,
                            version: entry.version,
                        });
                    }
                    return entry.position;
                }
            }

            let growth = if self.logical_size >= GROWTH_CAP {
                GROWTH_CAP
            } else {
                self.logical_size.max(MIN_GROWTH)
            };

            let old_size = self.logical_size;
            self.logical_size += growth;

            #[allow(clippy::cast_possible_truncation)]
            let growth_len = growth as u32;

            if let Some(idx) = self.tail_entry_index() {
                self.entries[idx].length += growth_len;
            } else {
                self.insert_sorted(FreeRange { position: old_size, length: growth_len, version: 0 });
            }
        }
    }
}

fn expect_ref(tagged: Tagged, what: &'static str) -> Result<Ref> {
    match tagged {
        Tagged::Ref(r) => Ok(r),
        Tagged::Literal(_) => Err(Error::CorruptedFile(what)),
    }
}

/// Copy-on-write-writes every dirty array reachable from `r` into freshly
/// reserved file space, depth first, rewriting ref slots to point at the new
/// baseline locations as it unwinds. Arrays already in the baseline zone are
/// left untouched.
fn write_dirty_subtree(alloc: &mut Allocator, free: &mut OnDiskFreeList, storage: &mut dyn Storage, r: Ref) -> Result<Ref> {
    if r.is_null() || !alloc.is_writeable(r) {
        return Ok(r);
    }

    let mut array = Array::init_from_ref(alloc, r)?;

    if array.has_refs() {
        for i in 0..array.size() {
            if let Tagged::Ref(child) = array.get_tagged(alloc, i)? {
                let new_child = write_dirty_subtree(alloc, free, storage, child)?;
                if new_child != child {
                    array.set_tagged(alloc, i, Tagged::Ref(new_child))?;
                }
            }
        }
    }

    let bytes = array.raw_bytes(alloc)?;
    let dest = free.reserve(array.capacity());
    storage.remap(free.logical_size)?;
    storage.write_at(dest, &bytes)?;
    Ok(Ref::new(dest))
}

/// Runs the commit algorithm against a group with dirty (slab-zone) state,
/// writing the reachable graph into freshly reserved baseline space,
/// appending newly freed ranges to the on-file free list, and finally
/// flipping the file header's selector. Returns the new top ref (null if
/// the group has no tables at all and nothing changed).
///
/// `storage` must already be the write side of whichever backend `alloc`
/// was snapshotted from.
pub fn commit(
    alloc: &mut Allocator,
    storage: &mut dyn Storage,
    group: &mut Group,
    writer_version: Version,
    oldest_live_reader_version: Version,
) -> Result<Ref> {
    let is_shared = group.is_shared();

    let mut free = OnDiskFreeList::load(alloc, group)?;
    free.merge_adjacent(is_shared, oldest_live_reader_version);

    if let Some(top) = group.top_array_mut() {
        if alloc.is_writeable(top.ref_()) {
            for slot in 0..2 {
                if let Tagged::Ref(child) = top.get_tagged(alloc, slot)? {
                    let new_child = write_dirty_subtree(alloc, &mut free, storage, child)?;
                    if new_child != child {
                        top.set_tagged(alloc, slot, Tagged::Ref(new_child))?;
                    }
                }
            }
        }
    }

    for &(position, size) in alloc.pending_free() {
        free.push(position, size, writer_version);
    }
    alloc.clear_pending_free();

    let Some(top) = group.top_array() else {
        return Ok(Ref::null());
    };
    let table_names_ref = expect_ref(top.get_tagged(alloc, 0)?, "table_names")?;
    let tables_ref = expect_ref(top.get_tagged(alloc, 1)?, "tables")?;

    // Step 4: reserve one region, sized by worst-case upper bound, for the
    // free-list arrays and the top array -- the last reservation of the
    // commit, so the free list we serialize from it is already final.
    let entry_count_bound = free.entries.len() + 1;
    let list_bytes = ARRAY_HEADER_SIZE as u32 + 8 * entry_count_bound as u32;
    let list_array_count: u32 = if is_shared { 3 } else { 2 };
    let top_slot_count: u32 = if is_shared { 7 } else { 5 };
    let top_bytes = ARRAY_HEADER_SIZE as u32 + 8 * top_slot_count;
    let bound = list_bytes * list_array_count + top_bytes;

    let region_start = free.reserve(bound);
    storage.remap(free.logical_size)?;

    let mut offset = region_start;

    let positions_ref = write_u64_array(alloc, storage, &mut offset, free.entries.iter().map(|e| e.position))?;
    let lengths_ref = write_u64_array(alloc, storage, &mut offset, free.entries.iter().map(|e| u64::from(e.length)))?;
    let versions_ref = if is_shared {
        Some(write_u64_array(alloc, storage, &mut offset, free.entries.iter().map(|e| e.version))?)
    } else {
        None
    };

    let mut new_top = Array::create_refs(alloc, false, top_slot_count)?;
    new_top.set_tagged(alloc, 0, Tagged::Ref(table_names_ref))?;
    new_top.set_tagged(alloc, 1, Tagged::Ref(tables_ref))?;
    #[allow(clippy::cast_possible_wrap)]
    new_top.set_tagged(alloc, 2, Tagged::Literal(free.logical_size as i64))?;
    new_top.set_tagged(alloc, 3, Tagged::Ref(positions_ref))?;
    new_top.set_tagged(alloc, 4, Tagged::Ref(lengths_ref))?;
    if is_shared {
        new_top.set_tagged(alloc, 5, Tagged::Ref(versions_ref.expect("reserved above when shared")))?;
        #[allow(clippy::cast_possible_wrap)]
        new_top.set_tagged(alloc, 6, Tagged::Literal(writer_version as i64))?;
    }

    let top_bytes_final = new_top.raw_bytes(alloc)?;
    storage.write_at(offset, &top_bytes_final)?;
    let new_top_ref = Ref::new(offset);
    offset += top_bytes_final.len() as u64;

    // Step 7: flush the whole written region before the selector may move.
    storage.msync(region_start, offset - region_start)?;

    // Step 8: the selector flip is the single atomic decision point.
    let mut header = storage.header()?;
    let next_slot = header.next_slot();
    if next_slot == 0 {
        header.top_ref_0 = new_top_ref.offset();
    } else {
        header.top_ref_1 = new_top_ref.offset();
    }
    storage.write_header(&header)?;
    storage.msync(0, FILE_HEADER_SIZE)?;

    header.select = next_slot;
    storage.write_header(&header)?;
    storage.msync(0, FILE_HEADER_SIZE)?;

    group.set_top_array(Array::init_from_ref(alloc, new_top_ref)?);

    Ok(new_top_ref)
}

fn write_u64_array(
    alloc: &mut Allocator,
    storage: &mut dyn Storage,
    offset: &mut u64,
    values: impl ExactSizeIterator<Item = u64>,
) -> Result<Ref> {
    let mut array = Array::create(alloc, WType::Multiply, Width::W64, false, false, values.len() as u32, 0)?;
    for (i, v) in values.enumerate() {
        array.set_raw(alloc, i as u32, v)?;
    }
    let bytes = array.raw_bytes(alloc)?;
    storage.write_at(*offset, &bytes)?;
    let r = Ref::new(*offset);
    *offset += bytes.len() as u64;
    Ok(r)
}
