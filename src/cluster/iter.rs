// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use super::leaf::Leaf;
use super::Tree;
use crate::alloc::Allocator;
use crate::error::Result;
use crate::key::Key;
use crate::ref_::Ref;

/// Forward iterator over a [`Tree`]'s objects in key order.
///
/// Caches the current leaf and an index within it, advancing in place until
/// the leaf is exhausted. The tree's [`Tree::version`] at construction (or
/// last refresh) is captured alongside the cache; `next()` compares it
/// against the tree's current version on every call and transparently
/// re-descends via [`Tree::find_first_ge`] on a mismatch, so a structural
/// mutation mid-iteration (a split, merge, or column add/remove on the same
/// tree) never hands back a pointer into a leaf this iterator no longer
/// owns.
#[derive(Debug)]
pub struct Iter {
    next_target: Option<i64>,
    cached: Option<(Ref, u32)>,
    version: u64,
}

impl Iter {
    #[must_use]
    pub fn new(tree: &Tree) -> Self {
        Self { next_target: Some(0), cached: None, version: tree.version() }
    }

    /// Drops the cached leaf pointer and re-syncs to the tree's current
    /// version, forcing the next [`Iter::next`] call to re-descend from the
    /// root. Called automatically on a version mismatch; exposed so a
    /// caller that knows the tree changed can force this without waiting
    /// for the lazy check.
    pub fn refresh(&mut self, tree: &Tree) {
        self.cached = None;
        self.version = tree.version();
    }

    pub fn next(&mut self, tree: &Tree, alloc: &Allocator) -> Result<Option<(Key, u32, Ref)>> {
        if self.version != tree.version() {
            self.refresh(tree);
        }

        if let Some((leaf_ref, idx)) = self.cached {
            let leaf = Leaf::from_ref(alloc, leaf_ref, tree.column_types().len() as u32)?;
            if idx < leaf.size(alloc)? {
                let key = leaf.key_at(alloc, idx)?;
                self.cached = Some((leaf_ref, idx + 1));
                self.next_target = key.checked_add(1);
                return Ok(Some((Key::new(key), idx, leaf_ref)));
            }
            self.cached = None;
        }

        let Some(target) = self.next_target else {
            return Ok(None);
        };

        match tree.find_first_ge(alloc, target)? {
            None => {
                self.next_target = None;
                Ok(None)
            }
            Some((key, idx, leaf_ref)) => {
                self.next_target = key.checked_add(1);
                self.cached = Some((leaf_ref, idx + 1));
                Ok(Some((Key::new(key), idx, leaf_ref)))
            }
        }
    }
}
