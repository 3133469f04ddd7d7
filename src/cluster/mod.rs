// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

pub mod inner;
pub mod iter;
pub mod leaf;
pub mod object;

pub use inner::Inner;
pub use iter::Iter;
pub use leaf::{Leaf, CLUSTER_CAPACITY, MIN_LEAF_SIZE};
pub use object::{MutObject, Object, Value};

use crate::alloc::Allocator;
use crate::column_type::ColumnType;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::ref_::Ref;

/// Minimum fanout of an inner node before it must be rebalanced (mirrors
/// [`MIN_LEAF_SIZE`]'s policy one level up; see `DESIGN.md`).
const MIN_INNER_FANOUT: u32 = CLUSTER_CAPACITY / 4;

/// A B+-tree of clusters: one table's worth of objects, keyed by [`Key`].
///
/// Copy-on-write propagation from a mutated leaf up to the root is never
/// delegated to [`crate::array::Array`]'s own `set_parent`/`notify_parent`
/// hook (each call to `notify_parent` reconstructs a fresh, parent-less
/// temporary array, so it can cascade at most one level). Instead every
/// mutating operation first descends while recording a `levels` stack of
/// `(Inner, child_index)` pairs, then walks that stack bottom-up afterward,
/// explicitly rewriting each ancestor's child ref.
pub struct Tree {
    root_ref: Ref,
    column_types: Vec<ColumnType>,
    size: u32,
    version: u64,
}

type Levels = Vec<(Inner, u32)>;

impl Tree {
    /// Creates a brand new, empty tree (a single empty leaf as root).
    pub fn empty(alloc: &mut Allocator, column_types: Vec<ColumnType>) -> Result<Self> {
        let leaf = Leaf::create_empty(alloc, &column_types)?;
        Ok(Self { root_ref: leaf.ref_(), column_types, size: 0, version: 0 })
    }

    /// Reopens a tree whose shape was persisted elsewhere (the table's row
    /// in the group's top array). The version counter always restarts at 0:
    /// it only needs to outrun accessors cached against *this* in-memory
    /// `Tree`, and a freshly reopened one has none yet.
    #[must_use]
    pub fn from_parts(root_ref: Ref, column_types: Vec<ColumnType>, size: u32) -> Self {
        Self { root_ref, column_types, size, version: 0 }
    }

    /// The current structural-mutation version. Bumped on every insert,
    /// erase, and column add/remove; used by [`Iter`] and by accessors
    /// ([`Object`]/[`MutObject`]) to detect that the tree has moved since
    /// they were captured.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The ref of this tree's root node, for persisting into the table's
    /// row in the owning group's top array.
    #[must_use]
    pub fn root_ref(&self) -> Ref {
        self.root_ref
    }

    /// Number of objects currently stored in the tree.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// This table's column types, in column order.
    #[must_use]
    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    fn column_type(&self, col: u32) -> Result<ColumnType> {
        self.column_types.get(col as usize).copied().ok_or(Error::InvalidColumn)
    }

    fn is_leaf_ref(alloc: &Allocator, r: Ref) -> Result<bool> {
        Ok(!crate::array::Array::init_from_ref(alloc, r)?.is_inner_bptree_node())
    }

    /// Descends from the root to the leaf that would hold `key`, recording
    /// the path taken. Out-of-range keys are clamped to the rightmost
    /// child at every inner level; whether `key` is actually present is
    /// decided by the caller via [`Leaf::find`] once the leaf is reached.
    fn descend(&self, alloc: &Allocator, key: i64) -> Result<(Levels, Leaf)> {
        let mut levels = Levels::new();
        let mut r = self.root_ref;

        loop {
            if Self::is_leaf_ref(alloc, r)? {
                let leaf = Leaf::from_ref(alloc, r, self.column_types.len() as u32)?;
                return Ok((levels, leaf));
            }

            let inner = Inner::from_ref(alloc, r)?;
            let idx = inner.find_child(alloc, key)?;
            let child = inner.child_ref(alloc, idx)?;
            levels.push((inner, idx));
            r = child;
        }
    }

    /// Rewrites every ancestor's child ref bottom-up after a leaf mutation
    /// that didn't change the tree's shape (no split, no merge).
    fn propagate(&mut self, alloc: &mut Allocator, mut levels: Levels, mut child_ref: Ref) -> Result<()> {
        while let Some((mut inner, idx)) = levels.pop() {
            inner.set_child_ref(alloc, idx, child_ref)?;
            child_ref = inner.ref_();
        }
        self.root_ref = child_ref;
        Ok(())
    }

    /// Rewrites ancestors after a leaf or inner node split into `(left, right)`,
    /// cascading further splits upward and creating a new root if the split
    /// reaches the top.
    fn propagate_split(
        &mut self,
        alloc: &mut Allocator,
        mut levels: Levels,
        left_key: i64,
        left_ref: Ref,
        right_key: i64,
        right_ref: Ref,
    ) -> Result<()> {
        let mut pending = Some((left_key, left_ref, right_key, right_ref));

        while let Some((mut inner, idx)) = levels.pop() {
            let (lk, lref, rk, rref) = pending.take().expect("pending split carried each iteration");
            inner.set_last_key(alloc, idx, lk)?;
            inner.set_child_ref(alloc, idx, lref)?;
            inner.insert_child(alloc, idx + 1, rk, rref)?;

            if inner.fanout() <= CLUSTER_CAPACITY {
                return self.propagate(alloc, levels, inner.ref_());
            }

            let split_at = inner.fanout() / 2;
            let new_left_last = inner.last_key(alloc, split_at - 1)?;
            let sibling = inner.split_off(alloc, split_at)?;
            let new_right_last = sibling.last_key(alloc, sibling.fanout() - 1)?;
            pending = Some((new_left_last, inner.ref_(), new_right_last, sibling.ref_()));
        }

        let (lk, lref, rk, rref) = pending.expect("pending split carried to root");
        let new_root = Inner::create_with_children(alloc, &[(lk, lref), (rk, rref)])?;
        self.root_ref = new_root.ref_();
        Ok(())
    }

    /// Reads column `col` of the object at `key`.
    pub fn get_value(&self, alloc: &Allocator, key: Key, col: u32) -> Result<Value> {
        let ty = self.column_type(col)?;
        let (_, leaf) = self.descend(alloc, key.value())?;
        match leaf.find(alloc, key.value())? {
            Ok(idx) => leaf.get_value(alloc, idx, col, ty),
            Err(_) => Err(Error::KeyNotFound),
        }
    }

    /// Overwrites column `col` of the object at `key`.
    pub fn set_value(&mut self, alloc: &mut Allocator, key: Key, col: u32, value: Value) -> Result<()> {
        let ty = self.column_type(col)?;
        let (levels, mut leaf) = self.descend(alloc, key.value())?;
        let idx = match leaf.find(alloc, key.value())? {
            Ok(idx) => idx,
            Err(_) => return Err(Error::KeyNotFound),
        };
        leaf.set_value(alloc, idx, col, ty, &value)?;
        self.propagate(alloc, levels, leaf.ref_())
    }

    /// Inserts a new object at `key`.
    pub fn insert(&mut self, alloc: &mut Allocator, key: Key, values: Vec<Value>) -> Result<Object> {
        let (levels, mut leaf) = self.descend(alloc, key.value())?;

        let insert_idx = match leaf.find(alloc, key.value())? {
            Ok(_) => return Err(Error::KeyAlreadyUsed),
            Err(idx) => idx,
        };

        leaf.insert_row(alloc, insert_idx, key.value(), &values, &self.column_types)?;

        if leaf.size(alloc)? > CLUSTER_CAPACITY {
            let split_at = leaf.size(alloc)? / 2;
            let left_last = leaf.key_at(alloc, split_at - 1)?;
            let sibling = leaf.split_off(alloc, split_at, &self.column_types)?;
            let right_last = sibling.key_at(alloc, sibling.size(alloc)? - 1)?;
            self.propagate_split(alloc, levels, left_last, leaf.ref_(), right_last, sibling.ref_())?;
        } else {
            self.propagate(alloc, levels, leaf.ref_())?;
        }

        self.size += 1;
        self.version += 1;
        Ok(Object::new(key, self.version))
    }

    /// Removes the object at `key`, rebalancing underflowing
    /// leaves and inner nodes bottom-up.
    pub fn erase(&mut self, alloc: &mut Allocator, key: Key) -> Result<()> {
        let (mut levels, mut leaf) = self.descend(alloc, key.value())?;

        let idx = match leaf.find(alloc, key.value())? {
            Ok(idx) => idx,
            Err(_) => return Err(Error::KeyNotFound),
        };
        leaf.erase_row(alloc, idx)?;
        self.size -= 1;
        self.version += 1;

        let Some((parent, parent_idx)) = levels.pop() else {
            self.root_ref = leaf.ref_();
            return Ok(());
        };

        if leaf.size(alloc)? >= MIN_LEAF_SIZE {
            levels.push((parent, parent_idx));
            return self.propagate(alloc, levels, leaf.ref_());
        }

        self.rebalance_leaf(alloc, levels, parent, parent_idx, leaf)
    }

    fn rebalance_leaf(
        &mut self,
        alloc: &mut Allocator,
        levels: Levels,
        mut parent: Inner,
        idx: u32,
        mut leaf: Leaf,
    ) -> Result<()> {
        if idx > 0 {
            let sibling_idx = idx - 1;
            let mut left = Leaf::from_ref(alloc, parent.child_ref(alloc, sibling_idx)?, self.column_types.len() as u32)?;
            let combined = left.size(alloc)? + leaf.size(alloc)?;

            if combined <= CLUSTER_CAPACITY {
                left.merge_from(alloc, leaf, &self.column_types)?;
                let new_last = left.key_at(alloc, left.size(alloc)? - 1)?;
                parent.set_last_key(alloc, sibling_idx, new_last)?;
                parent.set_child_ref(alloc, sibling_idx, left.ref_())?;
                parent.remove_child(alloc, idx)?;
            } else {
                leaf::move_last_row(alloc, &mut left, &mut leaf, &self.column_types)?;
                let new_left_last = left.key_at(alloc, left.size(alloc)? - 1)?;
                parent.set_last_key(alloc, sibling_idx, new_left_last)?;
                parent.set_child_ref(alloc, sibling_idx, left.ref_())?;
                parent.set_child_ref(alloc, idx, leaf.ref_())?;
            }
        } else {
            let sibling_idx = idx + 1;
            let mut right = Leaf::from_ref(alloc, parent.child_ref(alloc, sibling_idx)?, self.column_types.len() as u32)?;
            let combined = leaf.size(alloc)? + right.size(alloc)?;

            if combined <= CLUSTER_CAPACITY {
                leaf.merge_from(alloc, right, &self.column_types)?;
                let new_last = leaf.key_at(alloc, leaf.size(alloc)? - 1)?;
                parent.set_last_key(alloc, idx, new_last)?;
                parent.set_child_ref(alloc, idx, leaf.ref_())?;
                parent.remove_child(alloc, sibling_idx)?;
            } else {
                leaf::move_first_row(alloc, &mut right, &mut leaf, &self.column_types)?;
                let new_leaf_last = leaf.key_at(alloc, leaf.size(alloc)? - 1)?;
                parent.set_last_key(alloc, idx, new_leaf_last)?;
                parent.set_child_ref(alloc, idx, leaf.ref_())?;
                parent.set_child_ref(alloc, sibling_idx, right.ref_())?;
            }
        }

        self.rebalance_inner(alloc, levels, parent)
    }

    /// Propagates an inner node whose fanout changed (via the leaf rebalance
    /// above, or recursively via this same function), rebalancing it in turn
    /// if it underflowed, and collapsing the root when it shrinks to a
    /// single child.
    fn rebalance_inner(&mut self, alloc: &mut Allocator, mut levels: Levels, inner: Inner) -> Result<()> {
        let Some((parent, parent_idx)) = levels.pop() else {
            if inner.fanout() == 1 {
                let sole = inner.sole_child(alloc)?;
                inner.destroy(alloc)?;
                self.root_ref = sole;
            } else {
                self.root_ref = inner.ref_();
            }
            return Ok(());
        };

        if inner.fanout() >= MIN_INNER_FANOUT {
            levels.push((parent, parent_idx));
            return self.propagate(alloc, levels, inner.ref_());
        }

        self.rebalance_inner_underflow(alloc, levels, parent, parent_idx, inner)
    }

    fn rebalance_inner_underflow(
        &mut self,
        alloc: &mut Allocator,
        levels: Levels,
        mut parent: Inner,
        idx: u32,
        mut inner: Inner,
    ) -> Result<()> {
        if idx > 0 {
            let sibling_idx = idx - 1;
            let mut left = Inner::from_ref(alloc, parent.child_ref(alloc, sibling_idx)?)?;
            let combined = left.fanout() + inner.fanout();

            if combined <= CLUSTER_CAPACITY {
                left.merge_from(alloc, inner)?;
                let new_last = left.last_key(alloc, left.fanout() - 1)?;
                parent.set_last_key(alloc, sibling_idx, new_last)?;
                parent.set_child_ref(alloc, sibling_idx, left.ref_())?;
                parent.remove_child(alloc, idx)?;
            } else {
                inner::move_last_child(alloc, &mut left, &mut inner)?;
                let new_left_last = left.last_key(alloc, left.fanout() - 1)?;
                parent.set_last_key(alloc, sibling_idx, new_left_last)?;
                parent.set_child_ref(alloc, sibling_idx, left.ref_())?;
                parent.set_child_ref(alloc, idx, inner.ref_())?;
            }
        } else {
            let sibling_idx = idx + 1;
            let mut right = Inner::from_ref(alloc, parent.child_ref(alloc, sibling_idx)?)?;
            let combined = inner.fanout() + right.fanout();

            if combined <= CLUSTER_CAPACITY {
                inner.merge_from(alloc, right)?;
                let new_last = inner.last_key(alloc, inner.fanout() - 1)?;
                parent.set_last_key(alloc, idx, new_last)?;
                parent.set_child_ref(alloc, idx, inner.ref_())?;
                parent.remove_child(alloc, sibling_idx)?;
            } else {
                inner::move_first_child(alloc, &mut right, &mut inner)?;
                let new_inner_last = inner.last_key(alloc, inner.fanout() - 1)?;
                parent.set_last_key(alloc, idx, new_inner_last)?;
                parent.set_child_ref(alloc, idx, inner.ref_())?;
                parent.set_child_ref(alloc, sibling_idx, right.ref_())?;
            }
        }

        self.rebalance_inner(alloc, levels, parent)
    }

    /// Finds the first key `>= target`, climbing to the next sibling subtree
    /// when the descended-to leaf is exhausted.
    pub fn find_first_ge(&self, alloc: &Allocator, target: i64) -> Result<Option<(i64, u32, Ref)>> {
        let (mut levels, mut leaf) = self.descend(alloc, target)?;

        loop {
            let pos = match leaf.find(alloc, target)? {
                Ok(idx) | Err(idx) => idx,
            };

            if pos < leaf.size(alloc)? {
                return Ok(Some((leaf.key_at(alloc, pos)?, pos, leaf.ref_())));
            }

            loop {
                let Some((inner, idx)) = levels.pop() else {
                    return Ok(None);
                };

                if idx + 1 < inner.fanout() {
                    let mut r = inner.child_ref(alloc, idx + 1)?;
                    levels.push((inner, idx + 1));

                    loop {
                        if Self::is_leaf_ref(alloc, r)? {
                            leaf = Leaf::from_ref(alloc, r, self.column_types.len() as u32)?;
                            break;
                        }
                        let child = Inner::from_ref(alloc, r)?;
                        let first = child.child_ref(alloc, 0)?;
                        levels.push((child, 0));
                        r = first;
                    }
                    break;
                }
            }
        }
    }

    #[must_use]
    pub fn iter(&self) -> Iter {
        Iter::new(self)
    }

    fn walk_add_column(alloc: &mut Allocator, r: Ref, column_count_before: u32, position: u32, ty: ColumnType) -> Result<Ref> {
        if Self::is_leaf_ref(alloc, r)? {
            let mut leaf = Leaf::from_ref(alloc, r, column_count_before)?;
            let size = leaf.size(alloc)?;
            leaf.add_column(alloc, position, ty, size)?;
            Ok(leaf.ref_())
        } else {
            let mut inner = Inner::from_ref(alloc, r)?;
            for i in 0..inner.fanout() {
                let child = inner.child_ref(alloc, i)?;
                let new_child = Self::walk_add_column(alloc, child, column_count_before, position, ty)?;
                inner.set_child_ref(alloc, i, new_child)?;
            }
            Ok(inner.ref_())
        }
    }

    fn walk_remove_column(alloc: &mut Allocator, r: Ref, column_count_before: u32, position: u32) -> Result<Ref> {
        if Self::is_leaf_ref(alloc, r)? {
            let mut leaf = Leaf::from_ref(alloc, r, column_count_before)?;
            leaf.remove_column(alloc, position)?;
            Ok(leaf.ref_())
        } else {
            let mut inner = Inner::from_ref(alloc, r)?;
            for i in 0..inner.fanout() {
                let child = inner.child_ref(alloc, i)?;
                let new_child = Self::walk_remove_column(alloc, child, column_count_before, position)?;
                inner.set_child_ref(alloc, i, new_child)?;
            }
            Ok(inner.ref_())
        }
    }

    /// Adds a column to every leaf in the tree.
    pub fn add_column(&mut self, alloc: &mut Allocator, position: u32, ty: ColumnType) -> Result<()> {
        let before = self.column_types.len() as u32;
        self.root_ref = Self::walk_add_column(alloc, self.root_ref, before, position, ty)?;
        self.column_types.insert(position as usize, ty);
        self.version += 1;
        Ok(())
    }

    /// Removes a column from every leaf in the tree.
    pub fn remove_column(&mut self, alloc: &mut Allocator, position: u32) -> Result<()> {
        let before = self.column_types.len() as u32;
        self.root_ref = Self::walk_remove_column(alloc, self.root_ref, before, position)?;
        self.column_types.remove(position as usize);
        self.version += 1;
        Ok(())
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
    fn insert_get_erase_roundtrip() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();

        tree.insert(&mut alloc, Key::new(1), vec![Value::Int(100)]).unwrap();
        assert_eq!(Value::Int(100), tree.get_value(&alloc, Key::new(1), 0).unwrap());

        tree.erase(&mut alloc, Key::new(1)).unwrap();
        assert!(matches!(tree.get_value(&alloc, Key::new(1), 0), Err(Error::KeyNotFound)));
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();
        tree.insert(&mut alloc, Key::new(1), vec![Value::Int(1)]).unwrap();
        assert!(matches!(
            tree.insert(&mut alloc, Key::new(1), vec![Value::Int(2)]),
            Err(Error::KeyAlreadyUsed)
        ));
    }

    #[test]
    fn many_inserts_trigger_leaf_split_and_stay_queryable() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();

        for k in 0..1000_i64 {
            tree.insert(&mut alloc, Key::new(k), vec![Value::Int(k)]).unwrap();
        }
        assert_eq!(1000, tree.size());

        for k in [0_i64, 500, 999] {
            assert_eq!(Value::Int(k), tree.get_value(&alloc, Key::new(k), 0).unwrap());
        }
    }

    #[test]
    fn many_inserts_then_erases_shrink_back_to_single_leaf() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();

        for k in 0..600_i64 {
            tree.insert(&mut alloc, Key::new(k), vec![Value::Int(k)]).unwrap();
        }
        for k in 0..599_i64 {
            tree.erase(&mut alloc, Key::new(k)).unwrap();
        }

        assert_eq!(1, tree.size());
        assert_eq!(Value::Int(599), tree.get_value(&alloc, Key::new(599), 0).unwrap());
        assert!(Tree::is_leaf_ref(&alloc, tree.root_ref()).unwrap());
    }

    #[test]
    fn structural_mutations_bump_version_but_set_value_does_not() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();
        assert_eq!(0, tree.version());

        tree.insert(&mut alloc, Key::new(1), vec![Value::Int(1)]).unwrap();
        assert_eq!(1, tree.version());

        tree.set_value(&mut alloc, Key::new(1), 0, Value::Int(2)).unwrap();
        assert_eq!(1, tree.version());

        tree.erase(&mut alloc, Key::new(1)).unwrap();
        assert_eq!(2, tree.version());

        tree.add_column(&mut alloc, 1, ColumnType::Bool).unwrap();
        assert_eq!(3, tree.version());

        tree.remove_column(&mut alloc, 1).unwrap();
        assert_eq!(4, tree.version());
    }

    #[test]
    fn add_and_remove_column_across_a_split_tree() {
        let mut alloc = fresh_allocator();
        let mut tree = Tree::empty(&mut alloc, vec![ColumnType::Int]).unwrap();
        for k in 0..600_i64 {
            tree.insert(&mut alloc, Key::new(k), vec![Value::Int(k)]).unwrap();
        }

        tree.add_column(&mut alloc, 1, ColumnType::String).unwrap();
        assert_eq!(Value::Null, tree.get_value(&alloc, Key::new(300), 1).unwrap());

        tree.set_value(&mut alloc, Key::new(300), 1, Value::String("hi".into())).unwrap();
        assert_eq!(Value::String("hi".into()), tree.get_value(&alloc, Key::new(300), 1).unwrap());

        tree.remove_column(&mut alloc, 0).unwrap();
        assert_eq!(1, tree.column_types().len());
    }
}
