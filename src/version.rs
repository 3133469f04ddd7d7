// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
    Arc,
};

/// A commit version number.
///
/// Advances by exactly one on each successful commit. Free-list entries are
/// stamped with the version of the commit that freed them, which is what
/// lets a reader pinned to an older version keep the slabs it still needs
/// reachable.
pub type Version = u64;

/// Thread-safe, monotonically increasing version counter.
///
/// Shared between the writer and the reader-table bookkeeping; cloning is
/// cheap (it's an `Arc` around an atomic).
#[derive(Clone, Debug)]
pub struct VersionCounter(Arc<AtomicU64>);

impl Default for VersionCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl VersionCounter {
    /// Creates a counter starting at `prev`.
    #[must_use]
    pub fn new(prev: Version) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Returns the current version without advancing it.
    #[must_use]
    pub fn get(&self) -> Version {
        self.0.load(Acquire)
    }

    /// Advances the counter and returns the new (post-commit) version.
    ///
    /// Called exactly once per commit, after the select byte has been
    /// flipped.
    #[must_use]
    pub fn advance(&self) -> Version {
        self.0.fetch_add(1, Release) + 1
    }

    /// Sets the counter to the version recovered from an existing file header.
    pub fn set(&self, version: Version) {
        self.0.store(version, Release);
    }

    /// Raises the counter to at least `version`, never lowering it.
    pub fn fetch_max(&self, version: Version) {
        self.0.fetch_max(version, AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn starts_at_zero() {
        let counter = VersionCounter::default();
        assert_eq!(0, counter.get());
    }

    #[test]
    fn advance_increments_and_returns_new_value() {
        let counter = VersionCounter::default();
        assert_eq!(1, counter.advance());
        assert_eq!(2, counter.advance());
        assert_eq!(2, counter.get());
    }

    #[test]
    fn fetch_max_never_lowers() {
        let counter = VersionCounter::new(10);
        counter.fetch_max(5);
        assert_eq!(10, counter.get());
        counter.fetch_max(20);
        assert_eq!(20, counter.get());
    }
}
