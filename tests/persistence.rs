//! # Persistence Tests
//!
//! Close/reopen round trips: the reopened engine must present exactly the
//! logical contents committed before the close, with the volatile index
//! rebuilt from the leaf list alone. Also covers the recovery free pool:
//! leaves emptied by removes are recycled after a restart instead of
//! growing the persistent list.

use std::ptr;

use pmkv::config::LEAF_KEYS;
use pmkv::storage::Pool;
use pmkv::{Status, Tree3};
use tempfile::tempdir;

const POOL_SIZE: u64 = 8 << 20;

fn open_engine(path: &std::path::Path) -> Tree3 {
    Tree3::open(ptr::null_mut(), path, POOL_SIZE).unwrap()
}

fn get_copy(engine: &Tree3, key: &[u8]) -> Option<Vec<u8>> {
    let mut out = None;
    match engine.get(key, |v| out = Some(v.to_vec())) {
        Status::Ok => out,
        _ => None,
    }
}

/// Length of the persistent leaf list, observed with the engine closed.
fn leaf_list_len(path: &std::path::Path) -> usize {
    let pool = Pool::open(path).unwrap();
    let mut len = 0;
    let mut off = pool.root_head().unwrap();
    while off != 0 {
        len += 1;
        off = pool.read_u64(off + LEAF_KEYS as u64 * 8).unwrap();
    }
    len
}

#[test]
fn single_key_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        assert_eq!(kv.put(b"key1", b"value1"), Status::Ok);
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 1);
    assert_eq!(get_copy(&kv, b"key1").unwrap(), b"value1");
}

#[test]
fn multi_key_put_across_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        kv.put(b"abc", b"A1");
        kv.put(b"def", b"B2");
        kv.put(b"hij", b"C3");
    }

    {
        let mut kv = open_engine(&path);
        kv.put(b"jkl", b"D4");
        kv.put(b"mno", b"E5");

        assert_eq!(kv.count().unwrap(), 5);
        assert_eq!(get_copy(&kv, b"abc").unwrap(), b"A1");
        assert_eq!(get_copy(&kv, b"def").unwrap(), b"B2");
        assert_eq!(get_copy(&kv, b"hij").unwrap(), b"C3");
        assert_eq!(get_copy(&kv, b"jkl").unwrap(), b"D4");
        assert_eq!(get_copy(&kv, b"mno").unwrap(), b"E5");
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 5);
}

#[test]
fn binary_and_empty_payloads_round_trip_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        kv.put(b"a\0b", b"nul-key");
        kv.put(b"", b"empty-key");
        kv.put(b"empty-value", b"");
        kv.put(b"v\0", b"trailing\0nul");
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 4);
    assert_eq!(get_copy(&kv, b"a\0b").unwrap(), b"nul-key");
    assert_eq!(get_copy(&kv, b"").unwrap(), b"empty-key");
    assert_eq!(get_copy(&kv, b"empty-value").unwrap(), b"");
    assert_eq!(get_copy(&kv, b"v\0").unwrap(), b"trailing\0nul");
    assert_eq!(kv.exists(b"ab"), Status::NotFound);
    assert_eq!(kv.exists(b"v"), Status::NotFound);
}

#[test]
fn removes_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        for i in 0..100 {
            kv.put(format!("key{i:03}").as_bytes(), format!("{i}").as_bytes());
        }
        for i in (0..100).step_by(2) {
            assert_eq!(kv.remove(format!("key{i:03}").as_bytes()), Status::Ok);
        }
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 50);
    for i in 0..100 {
        let key = format!("key{i:03}");
        if i % 2 == 0 {
            assert_eq!(kv.exists(key.as_bytes()), Status::NotFound, "{key} was removed");
        } else {
            assert_eq!(get_copy(&kv, key.as_bytes()).unwrap(), format!("{i}").into_bytes());
        }
    }
}

#[test]
fn overwrites_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        kv.put(b"k", b"first");
        kv.put(b"k", b"second");
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 1);
    assert_eq!(get_copy(&kv, b"k").unwrap(), b"second");
}

#[test]
fn emptied_leaves_are_recycled_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let mut kv = open_engine(&path);
        // enough keys for several leaves
        for i in 0..200 {
            kv.put(format!("key{i:03}").as_bytes(), b"v");
        }
        for i in 0..200 {
            assert_eq!(kv.remove(format!("key{i:03}").as_bytes()), Status::Ok);
        }
        assert_eq!(kv.count().unwrap(), 0);
    }

    let leaves_before = leaf_list_len(&path);
    assert!(leaves_before > 1, "the load must have built several leaves");

    {
        let mut kv = open_engine(&path);
        // recovery found only empty leaves; these puts must reuse them
        for i in 0..200 {
            kv.put(format!("new{i:03}").as_bytes(), b"w");
        }
        assert_eq!(kv.count().unwrap(), 200);
    }

    assert_eq!(
        leaf_list_len(&path),
        leaves_before,
        "reload reuses recovered empty leaves instead of allocating"
    );

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 200);
    assert_eq!(get_copy(&kv, b"new199").unwrap(), b"w");
}

#[test]
fn reopened_pool_rejects_wrong_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");
    std::fs::write(&path, vec![0u8; 1 << 20]).unwrap();
    assert!(
        Tree3::open(ptr::null_mut(), &path, 0).is_err(),
        "a file without the layout identifier must not open"
    );
}

#[test]
fn many_restarts_accumulate_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pool");

    for round in 0..10 {
        let mut kv = open_engine(&path);
        assert_eq!(kv.count().unwrap(), round * 20);
        for i in 0..20 {
            kv.put(format!("r{round:02}i{i:02}").as_bytes(), format!("{round}/{i}").as_bytes());
        }
    }

    let kv = open_engine(&path);
    assert_eq!(kv.count().unwrap(), 200);
    assert_eq!(get_copy(&kv, b"r00i00").unwrap(), b"0/0");
    assert_eq!(get_copy(&kv, b"r09i19").unwrap(), b"9/19");
}
