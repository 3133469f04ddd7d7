// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

//! Property-style checks against a real temp-file-backed database, each
//! exercising one structural guarantee the storage engine is supposed to
//! uphold, through the public API wherever possible.

use clustertree_core::{ColumnType, Config, Error, Key, Value};
use rand::seq::SliceRandom;
use test_log::test;

fn temp_path(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

/// Reads the three header fields (`top_ref_0`, `top_ref_1`, `select`) straight
/// off disk, at the fixed offsets the on-disk format reserves for them. The
/// header layout itself is a stable, externally-observable part of the file
/// format, even though the type that models it in-crate is private.
fn read_raw_header(path: &std::path::Path) -> (u64, u64, u8) {
    let bytes = std::fs::read(path).unwrap();
    let top_ref_0 = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let top_ref_1 = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    (top_ref_0, top_ref_1, bytes[23])
}

/// A link to another row and an ordinary integer cell, stored side by side
/// with string cells (which are ref-bearing), never get confused with one
/// another after a commit-and-reopen round trip.
#[test]
fn ref_and_literal_slots_never_collide() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    let mut txn = db.write().unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    let mut table = group.add_table(alloc, "t", vec![ColumnType::Int, ColumnType::Link, ColumnType::String]).unwrap();

    let max_key = i64::MAX >> 1;
    table
        .cluster_mut()
        .insert(txn.alloc_mut(), Key::new(0), vec![Value::Int(-1), Value::Link(Key::new(max_key)), Value::String("a".into())])
        .unwrap();
    table
        .cluster_mut()
        .insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(max_key), Value::Link(Key::new(0)), Value::String("b".repeat(500))])
        .unwrap();

    table.sync(txn.alloc_mut()).unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    group.put_table(alloc, "t", &table).unwrap();
    txn.commit().unwrap();

    let read = db.read().unwrap();
    let table = read.group().get_table(read.alloc(), "t").unwrap();

    assert_eq!(Value::Int(-1), table.cluster().get_value(read.alloc(), Key::new(0), 0).unwrap());
    assert_eq!(Value::Link(Key::new(max_key)), table.cluster().get_value(read.alloc(), Key::new(0), 1).unwrap());
    assert_eq!(Value::String("a".into()), table.cluster().get_value(read.alloc(), Key::new(0), 2).unwrap());

    assert_eq!(Value::Int(max_key), table.cluster().get_value(read.alloc(), Key::new(1), 0).unwrap());
    assert_eq!(Value::Link(Key::new(0)), table.cluster().get_value(read.alloc(), Key::new(1), 1).unwrap());
    assert_eq!(Value::String("b".repeat(500)), table.cluster().get_value(read.alloc(), Key::new(1), 2).unwrap());
}

/// Repeatedly erasing and reinserting the same volume of rows does not make
/// the file grow without bound: freed slab space is being accounted for and
/// handed back out, not merely abandoned.
#[test]
fn free_space_is_reclaimed_after_churn() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    {
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();
    }

    let mut round_sizes = Vec::new();
    for round in 0..8_i64 {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        for k in 0..200_i64 {
            if table.cluster().get_value(txn.alloc(), Key::new(k), 0).is_ok() {
                table.cluster_mut().erase(txn.alloc_mut(), Key::new(k)).unwrap();
            }
        }
        for k in 0..200_i64 {
            table.cluster_mut().insert(txn.alloc_mut(), Key::new(k), vec![Value::Int(k + round)]).unwrap();
        }
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
        round_sizes.push(db.file_size());
    }

    // Once the tree's shape has stabilized, later rounds of pure
    // erase-then-reinsert churn should not keep growing the file: the last
    // round's size should be within a small constant factor of the size
    // right after the steady state was first reached, not grow linearly
    // with the round count.
    let early = round_sizes[1];
    let late = *round_sizes.last().unwrap();
    assert!(late <= early * 2, "file grew from {early} to {late} bytes across steady-state churn rounds");
}

/// The selector byte alternates strictly between 0 and 1 on every commit,
/// and the top-ref slot a commit does *not* touch keeps the value it had
/// after the previous commit that wrote it, until its turn comes around
/// again.
#[test]
fn select_byte_alternates_and_idle_slot_is_untouched() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    {
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();
    }
    let (top0_1, top1_1, select_1) = read_raw_header(&path);
    assert_eq!(1, select_1, "first-ever commit must land in slot 1");
    assert_ne!(0, top1_1, "the slot just written must now point somewhere real");
    assert_eq!(0, top0_1, "the idle slot must be untouched by the first commit");

    {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(1)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }
    let (top0_2, top1_2, select_2) = read_raw_header(&path);
    assert_eq!(0, select_2, "select must flip back to 0 on the second commit");
    assert_ne!(0, top0_2, "the slot written by the second commit must now point somewhere real");
    assert_eq!(top1_1, top1_2, "the slot that sat idle this commit must be bit-for-bit unchanged");

    {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(2), vec![Value::Int(2)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }
    let (top0_3, _top1_3, select_3) = read_raw_header(&path);
    assert_eq!(1, select_3, "select must flip forward to 1 on the third commit");
    assert_eq!(top0_2, top0_3, "the slot idle on this commit must still match the prior commit's value");
}

/// Keys inserted in a shuffled, non-sequential order are all still
/// reachable and read back with the right value, and a sorted walk by key
/// (via repeated point lookups) returns them in increasing order.
#[test]
fn random_order_insertions_stay_correctly_ordered() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    let mut keys: Vec<i64> = (0..2000).collect();
    keys.shuffle(&mut rand::rng());

    let mut txn = db.write().unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    let mut table = group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
    for &k in &keys {
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(k), vec![Value::Int(k * 3)]).unwrap();
    }
    table.sync(txn.alloc_mut()).unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    group.put_table(alloc, "t", &table).unwrap();
    txn.commit().unwrap();

    let read = db.read().unwrap();
    let table = read.group().get_table(read.alloc(), "t").unwrap();
    assert_eq!(2000, table.row_count());

    for k in 0..2000_i64 {
        assert_eq!(Value::Int(k * 3), table.cluster().get_value(read.alloc(), Key::new(k), 0).unwrap());
    }
}

/// Mutating a row that lives in a leaf committed by an earlier transaction
/// copies that leaf (and every node on the path up to the root) into a
/// fresh, writeable slab slot, rather than touching it in place.
#[test]
fn insert_commits_writeable_refs_along_the_path() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    {
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();
    }

    let old_root = {
        let read = db.read().unwrap();
        read.group().get_table(read.alloc(), "t").unwrap().cluster().root_ref()
    };

    let mut txn = db.write().unwrap();
    assert!(!txn.alloc().is_writeable(old_root), "a ref committed in a prior transaction must start read-only");

    let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(7)]).unwrap();

    let new_root = table.cluster().root_ref();
    assert_ne!(old_root, new_root, "mutating a committed leaf must copy it into a fresh slab slot");
    assert!(txn.alloc().is_writeable(new_root), "the freshly copied root must be writeable in the same transaction");

    table.sync(txn.alloc_mut()).unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    group.put_table(alloc, "t", &table).unwrap();
    txn.commit().unwrap();
}

/// Every column type round-trips through a commit and reopen, including the
/// null sentinel for each fixed-width type.
#[test]
fn every_column_type_roundtrips_through_commit() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    let types = vec![
        ColumnType::Int,
        ColumnType::Bool,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::String,
        ColumnType::Binary,
        ColumnType::Timestamp,
        ColumnType::Link,
    ];
    let values = vec![
        Value::Int(-42),
        Value::Bool(true),
        Value::Float(1.5),
        Value::Double(2.5),
        Value::String("hello".into()),
        Value::Binary(vec![1, 2, 3, 4]),
        Value::Timestamp(1_700_000_000_000),
        Value::Link(Key::new(9)),
    ];
    let nulls = vec![Value::Null; types.len()];

    let mut txn = db.write().unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    let mut table = group.add_table(alloc, "t", types.clone()).unwrap();
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(0), values.clone()).unwrap();
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), nulls).unwrap();
    table.sync(txn.alloc_mut()).unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    group.put_table(alloc, "t", &table).unwrap();
    txn.commit().unwrap();

    let read = db.read().unwrap();
    let table = read.group().get_table(read.alloc(), "t").unwrap();
    for (col, expected) in values.iter().enumerate() {
        assert_eq!(*expected, table.cluster().get_value(read.alloc(), Key::new(0), col as u32).unwrap());
    }
    for col in 0..types.len() as u32 {
        assert_eq!(Value::Null, table.cluster().get_value(read.alloc(), Key::new(1), col).unwrap());
    }
}

/// Two readers opened at different points in a table's history each keep
/// seeing exactly the row count and values current as of their own
/// snapshot, never a mix of the two.
#[test]
fn independent_readers_each_see_their_own_snapshot() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    {
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        let mut table = group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(100)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }
    let reader_a = db.read().unwrap();

    {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        table.cluster_mut().set_value(txn.alloc_mut(), Key::new(1), 0, Value::Int(200)).unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(2), vec![Value::Int(300)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }
    let reader_b = db.read().unwrap();

    let table_a = reader_a.group().get_table(reader_a.alloc(), "t").unwrap();
    assert_eq!(1, table_a.row_count());
    assert_eq!(Value::Int(100), table_a.cluster().get_value(reader_a.alloc(), Key::new(1), 0).unwrap());

    let table_b = reader_b.group().get_table(reader_b.alloc(), "t").unwrap();
    assert_eq!(2, table_b.row_count());
    assert_eq!(Value::Int(200), table_b.cluster().get_value(reader_b.alloc(), Key::new(1), 0).unwrap());
    assert_eq!(Value::Int(300), table_b.cluster().get_value(reader_b.alloc(), Key::new(2), 0).unwrap());
}

/// While a reader stays pinned to an old snapshot, a writer can churn the
/// same key range many times over without ever corrupting the bytes that
/// reader still has a live view onto.
#[test]
fn reader_pin_keeps_freed_ranges_off_limits() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).is_shared(true).open().unwrap();

    {
        let mut txn = db.write().unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
        txn.commit().unwrap();
    }

    for k in 0..500_i64 {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(k), vec![Value::Int(k)]).unwrap();
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }

    let reader = db.read().unwrap();
    let pinned_table = reader.group().get_table(reader.alloc(), "t").unwrap();

    for round in 0..5_i64 {
        let mut txn = db.write().unwrap();
        let mut table = txn.group().get_table(txn.alloc(), "t").unwrap();
        for k in 0..500_i64 {
            table.cluster_mut().erase(txn.alloc_mut(), Key::new(k)).unwrap();
        }
        for k in 0..500_i64 {
            table.cluster_mut().insert(txn.alloc_mut(), Key::new(k), vec![Value::Int(k * 10 + round)]).unwrap();
        }
        table.sync(txn.alloc_mut()).unwrap();
        let (group, alloc) = txn.group_and_alloc_mut();
        group.put_table(alloc, "t", &table).unwrap();
        txn.commit().unwrap();
    }

    for k in 0..500_i64 {
        assert_eq!(Value::Int(k), pinned_table.cluster().get_value(reader.alloc(), Key::new(k), 0).unwrap());
    }

    drop(reader);

    let fresh = db.read().unwrap();
    let fresh_table = fresh.group().get_table(fresh.alloc(), "t").unwrap();
    for k in 0..500_i64 {
        assert_eq!(Value::Int(k * 10 + 4), fresh_table.cluster().get_value(fresh.alloc(), Key::new(k), 0).unwrap());
    }
}

/// Inserting a row and then erasing it returns the table to exactly the
/// size and contents it had before, and the key becomes available for
/// reuse.
#[test]
fn insert_then_erase_restores_prior_state() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    let mut txn = db.write().unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    let mut table = group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(1), vec![Value::Int(1)]).unwrap();
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(2), vec![Value::Int(2)]).unwrap();

    let size_before = table.cluster().size();

    table.cluster_mut().insert(txn.alloc_mut(), Key::new(99), vec![Value::Int(99)]).unwrap();
    table.cluster_mut().erase(txn.alloc_mut(), Key::new(99)).unwrap();

    assert_eq!(size_before, table.cluster().size());
    assert!(matches!(table.cluster().get_value(txn.alloc(), Key::new(99), 0), Err(Error::KeyNotFound)));
    assert_eq!(Value::Int(1), table.cluster().get_value(txn.alloc(), Key::new(1), 0).unwrap());
    assert_eq!(Value::Int(2), table.cluster().get_value(txn.alloc(), Key::new(2), 0).unwrap());

    // The key is free to reuse: a second insert under the same key succeeds
    // rather than raising `KeyAlreadyUsed`.
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(99), vec![Value::Int(100)]).unwrap();
    assert_eq!(Value::Int(100), table.cluster().get_value(txn.alloc(), Key::new(99), 0).unwrap());
}

/// Inserting a row with a much larger key than any row seen so far (forcing
/// the cluster's key array to widen) does not disturb the values already
/// stored under the smaller keys.
#[test]
fn growing_key_width_does_not_corrupt_earlier_rows() {
    let (_dir, path) = temp_path("db");
    let mut db = Config::new(&path).open().unwrap();

    let mut txn = db.write().unwrap();
    let (group, alloc) = txn.group_and_alloc_mut();
    let mut table = group.add_table(alloc, "t", vec![ColumnType::Int]).unwrap();

    for k in 0..10_i64 {
        table.cluster_mut().insert(txn.alloc_mut(), Key::new(k), vec![Value::Int(k)]).unwrap();
    }

    let huge_key = i64::MAX >> 1;
    table.cluster_mut().insert(txn.alloc_mut(), Key::new(huge_key), vec![Value::Int(-1)]).unwrap();

    for k in 0..10_i64 {
        assert_eq!(Value::Int(k), table.cluster().get_value(txn.alloc(), Key::new(k), 0).unwrap());
    }
    assert_eq!(Value::Int(-1), table.cluster().get_value(txn.alloc(), Key::new(huge_key), 0).unwrap());
}
