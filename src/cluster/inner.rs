// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::alloc::Allocator;
use crate::array::{Array, WType, Width};
use crate::error::{Error, Result};
use crate::ref_::{Ref, Tagged};

/// An inner B+-tree node: slot 0 of its backing array is a ref to a "last key
/// per child" array, slots `1..=fanout` are refs to child nodes (themselves
/// either [`super::leaf::Leaf`]s or `Inner`s, distinguished by the child's own
/// `is_inner_bptree_node` flag).
///
/// Like [`super::leaf::Leaf`], keys are stored absolute rather than as
/// deltas from a base key. This is the same uncorrected deviation described
/// on that module's doc comment; see `DESIGN.md`.
pub struct Inner {
    slots: Array,
}

impl Inner {
    /// This node's backing array ref.
    #[must_use]
    pub fn ref_(&self) -> Ref {
        self.slots.ref_()
    }

    /// Binds to an existing inner node, validating its array header shape.
    pub fn from_ref(alloc: &Allocator, r: Ref) -> Result<Self> {
        let slots = Array::init_from_ref(alloc, r)?;
        if !slots.is_inner_bptree_node() || !slots.has_refs() || slots.size() < 2 {
            return Err(Error::CorruptedFile("inner slots array shape mismatch"));
        }
        Ok(Self { slots })
    }

    /// Builds a fresh inner node from an ordered list of `(last_key, child_ref)`.
    ///
    /// # Panics
    ///
    /// Panics if `children` is empty; an inner node always has at least one child.
    pub fn create_with_children(alloc: &mut Allocator, children: &[(i64, Ref)]) -> Result<Self> {
        assert!(!children.is_empty(), "inner node requires at least one child");

        let mut slots = Array::create_refs(alloc, true, children.len() as u32 + 1)?;
        let mut keys = Array::create(alloc, WType::Multiply, Width::W64, false, false, 0, 0)?;
        for (i, (key, _)) in children.iter().enumerate() {
            keys.insert_raw(alloc, i as u32, *key as u64)?;
        }
        slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;

        for (i, (_, child)) in children.iter().enumerate() {
            slots.set_tagged(alloc, i as u32 + 1, Tagged::Ref(*child))?;
        }

        Ok(Self { slots })
    }

    fn keys(&self, alloc: &Allocator) -> Result<Array> {
        match self.slots.get_tagged(alloc, 0)? {
            Tagged::Ref(r) => Array::init_from_ref(alloc, r),
            Tagged::Literal(_) => Err(Error::CorruptedFile("inner keys slot is not a ref")),
        }
    }

    /// Number of children this node has.
    #[must_use]
    pub fn fanout(&self) -> u32 {
        self.slots.size() - 1
    }

    /// The greatest key reachable through child `i`.
    pub fn last_key(&self, alloc: &Allocator, i: u32) -> Result<i64> {
        Ok(self.keys(alloc)?.get_raw(alloc, i)? as i64)
    }

    /// All child last-keys, in order.
    pub fn keys_vec(&self, alloc: &Allocator) -> Result<Vec<i64>> {
        let keys = self.keys(alloc)?;
        (0..keys.size()).map(|i| keys.get_raw(alloc, i).map(|v| v as i64)).collect()
    }

    /// Updates the last-key entry for child `i`.
    pub fn set_last_key(&mut self, alloc: &mut Allocator, i: u32, key: i64) -> Result<()> {
        let mut keys = self.keys(alloc)?;
        keys.set_raw(alloc, i, key as u64)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))
    }

    /// The ref of child `i`.
    pub fn child_ref(&self, alloc: &Allocator, i: u32) -> Result<Ref> {
        match self.slots.get_tagged(alloc, i + 1)? {
            Tagged::Ref(r) => Ok(r),
            Tagged::Literal(_) => Err(Error::CorruptedFile("inner child slot is not a ref")),
        }
    }

    /// Rewrites the ref of child `i`, e.g. after it was copy-on-written.
    pub fn set_child_ref(&mut self, alloc: &mut Allocator, i: u32, r: Ref) -> Result<()> {
        self.slots.set_tagged(alloc, i + 1, Tagged::Ref(r))
    }

    /// Finds the child subtree that should hold `key`, clamping to the
    /// rightmost child if `key` exceeds every `last_key` (the final
    /// leaf-level lookup is what actually rejects an out-of-range key).
    pub fn find_child(&self, alloc: &Allocator, key: i64) -> Result<u32> {
        let keys = self.keys_vec(alloc)?;
        let pos = crate::binary_search::partition_point(&keys, |&k| k < key) as u32;
        Ok(pos.min(self.fanout() - 1))
    }

    /// Inserts a new child at `i`, shifting subsequent children up.
    pub fn insert_child(&mut self, alloc: &mut Allocator, i: u32, key: i64, r: Ref) -> Result<()> {
        let mut keys = self.keys(alloc)?;
        keys.insert_raw(alloc, i, key as u64)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;
        self.slots.insert_raw(alloc, i + 1, Tagged::Ref(r).to_raw())
    }

    /// Appends a new child after the current last one.
    pub fn push_child(&mut self, alloc: &mut Allocator, key: i64, r: Ref) -> Result<()> {
        let fanout = self.fanout();
        self.insert_child(alloc, fanout, key, r)
    }

    /// Removes child `i`, shifting subsequent children down.
    pub fn remove_child(&mut self, alloc: &mut Allocator, i: u32) -> Result<()> {
        let mut keys = self.keys(alloc)?;
        keys.erase(alloc, i)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;
        self.slots.erase(alloc, i + 1)
    }

    /// Only child left: its ref, used when collapsing a root with `fanout() == 1`.
    pub fn sole_child(&self, alloc: &Allocator) -> Result<Ref> {
        debug_assert_eq!(1, self.fanout());
        self.child_ref(alloc, 0)
    }

    /// Splits off `[split_at, fanout)` into a new sibling node.
    pub fn split_off(&mut self, alloc: &mut Allocator, split_at: u32) -> Result<Inner> {
        let fanout = self.fanout();
        let mut children = Vec::with_capacity((fanout - split_at) as usize);
        for i in split_at..fanout {
            children.push((self.last_key(alloc, i)?, self.child_ref(alloc, i)?));
        }
        let sibling = Inner::create_with_children(alloc, &children)?;

        let mut keys = self.keys(alloc)?;
        keys.truncate(alloc, split_at)?;
        self.slots.set_tagged(alloc, 0, Tagged::Ref(keys.ref_()))?;
        self.slots.truncate(alloc, split_at + 1)?;

        Ok(sibling)
    }

    /// Appends every child of `other` onto `self`, then destroys `other`'s
    /// own arrays (not its children, which are now owned by `self`).
    pub fn merge_from(&mut self, alloc: &mut Allocator, other: Inner) -> Result<()> {
        for i in 0..other.fanout() {
            self.push_child(alloc, other.last_key(alloc, i)?, other.child_ref(alloc, i)?)?;
        }
        other.destroy(alloc)
    }

    /// Destroys this node's own arrays, not the subtrees its children point at.
    pub fn destroy(self, alloc: &mut Allocator) -> Result<()> {
        let keys = self.keys(alloc)?;
        keys.destroy(alloc);
        self.slots.destroy(alloc);
        Ok(())
    }
}

/// Moves `src`'s first child onto the end of `dst`.
pub(super) fn move_first_child(alloc: &mut Allocator, src: &mut Inner, dst: &mut Inner) -> Result<()> {
    let key = src.last_key(alloc, 0)?;
    let child = src.child_ref(alloc, 0)?;
    src.remove_child(alloc, 0)?;
    dst.push_child(alloc, key, child)
}

/// Moves `src`'s last child onto the front of `dst`.
pub(super) fn move_last_child(alloc: &mut Allocator, src: &mut Inner, dst: &mut Inner) -> Result<()> {
    let idx = src.fanout() - 1;
    let key = src.last_key(alloc, idx)?;
    let child = src.child_ref(alloc, idx)?;
    src.remove_child(alloc, idx)?;
    dst.insert_child(alloc, 0, key, child)
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
    fn create_and_find_child() {
        let mut alloc = fresh_allocator();
        let inner = Inner::create_with_children(&mut alloc, &[(10, Ref::new(8)), (20, Ref::new(16)), (30, Ref::new(24))]).unwrap();

        assert_eq!(3, inner.fanout());
        assert_eq!(0, inner.find_child(&alloc, 5).unwrap());
        assert_eq!(1, inner.find_child(&alloc, 15).unwrap());
        assert_eq!(2, inner.find_child(&alloc, 30).unwrap());
        assert_eq!(2, inner.find_child(&alloc, 1000).unwrap());
    }

    #[test]
    fn split_off_moves_upper_children() {
        let mut alloc = fresh_allocator();
        let mut inner = Inner::create_with_children(
            &mut alloc,
            &[(10, Ref::new(8)), (20, Ref::new(16)), (30, Ref::new(24)), (40, Ref::new(32))],
        )
        .unwrap();

        let sibling = inner.split_off(&mut alloc, 2).unwrap();
        assert_eq!(2, inner.fanout());
        assert_eq!(2, sibling.fanout());
        assert_eq!(30, sibling.last_key(&alloc, 0).unwrap());
    }

    #[test]
    fn insert_and_remove_child() {
        let mut alloc = fresh_allocator();
        let mut inner = Inner::create_with_children(&mut alloc, &[(10, Ref::new(8))]).unwrap();
        inner.push_child(&mut alloc, 20, Ref::new(16)).unwrap();
        assert_eq!(2, inner.fanout());

        inner.remove_child(&mut alloc, 0).unwrap();
        assert_eq!(1, inner.fanout());
        assert_eq!(20, inner.last_key(&alloc, 0).unwrap());
    }
}
