//! # Engine Behavior Tests
//!
//! Single-process dictionary semantics: put/get/exists/remove/count and the
//! two iteration callbacks, including binary keys, empty keys and values,
//! and overwrites that shrink and grow the stored value.

use std::collections::BTreeSet;
use std::ptr;

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

mod basic_operations {
    use super::*;

    #[test]
    fn put_then_get_single_key() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        assert_eq!(kv.put(b"key1", b"value1"), Status::Ok);
        assert_eq!(kv.count().unwrap(), 1);
        assert_eq!(get_copy(&kv, b"key1").unwrap(), b"value1");
        assert_eq!(kv.exists(b"key1"), Status::Ok);
    }

    #[test]
    fn get_missing_key_is_not_found_and_skips_callback() {
        let dir = tempdir().unwrap();
        let kv = open_engine(&dir.path().join("pool"));

        let mut called = false;
        assert_eq!(kv.get(b"nope", |_| called = true), Status::NotFound);
        assert!(!called, "callback must not run for a missing key");
        assert_eq!(kv.exists(b"nope"), Status::NotFound);
    }

    #[test]
    fn count_tracks_inserts_and_removes() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        for i in 0..10 {
            kv.put(format!("k{i}").as_bytes(), b"v");
        }
        assert_eq!(kv.count().unwrap(), 10);

        assert_eq!(kv.remove(b"k3"), Status::Ok);
        assert_eq!(kv.remove(b"k7"), Status::Ok);
        assert_eq!(kv.count().unwrap(), 8);

        assert_eq!(kv.remove(b"k3"), Status::NotFound, "already removed");
        assert_eq!(kv.count().unwrap(), 8);
    }

    #[test]
    fn remove_then_reinsert() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        assert_eq!(kv.put(b"k", b"v1"), Status::Ok);
        assert_eq!(kv.remove(b"k"), Status::Ok);
        assert_eq!(kv.get(b"k", |_| {}), Status::NotFound);
        assert_eq!(kv.put(b"k", b"v2"), Status::Ok);
        assert_eq!(get_copy(&kv, b"k").unwrap(), b"v2");
    }
}

mod boundary_values {
    use super::*;

    #[test]
    fn binary_keys_are_distinct_and_byte_exact() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        assert_eq!(kv.put(b"a", b"should_not_change"), Status::Ok);
        assert_eq!(kv.put(b"a\0b", b"stuff"), Status::Ok);
        assert_eq!(kv.count().unwrap(), 2);
        assert_eq!(get_copy(&kv, b"a").unwrap(), b"should_not_change");
        assert_eq!(get_copy(&kv, b"a\0b").unwrap(), b"stuff");

        assert_eq!(kv.remove(b"a\0b"), Status::Ok);
        assert_eq!(kv.count().unwrap(), 1);
        assert_eq!(kv.exists(b"a\0b"), Status::NotFound);
        assert_eq!(get_copy(&kv, b"a").unwrap(), b"should_not_change");
    }

    #[test]
    fn empty_key_and_empty_value_are_valid() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        assert_eq!(kv.put(b"", b"empty-key"), Status::Ok);
        assert_eq!(kv.put(b"empty-value", b""), Status::Ok);
        assert_eq!(kv.count().unwrap(), 2);
        assert_eq!(get_copy(&kv, b"").unwrap(), b"empty-key");
        assert_eq!(get_copy(&kv, b"empty-value").unwrap(), b"");
    }

    #[test]
    fn overwrite_shrinks_and_grows_the_value() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        for value in [&b"value1"[..], b"VALUE1", b"new_value", b"?"] {
            assert_eq!(kv.put(b"k", value), Status::Ok);
            assert_eq!(kv.count().unwrap(), 1);
        }
        assert_eq!(get_copy(&kv, b"k").unwrap(), b"?");

        let large = vec![0xabu8; 100_000];
        assert_eq!(kv.put(b"k", &large), Status::Ok);
        assert_eq!(kv.count().unwrap(), 1);
        assert_eq!(get_copy(&kv, b"k").unwrap(), large);
    }
}

mod iteration {
    use super::*;

    #[test]
    fn all_visits_every_live_key_exactly_once() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        let mut expected = BTreeSet::new();
        for i in 0..200 {
            let key = format!("key{i:03}").into_bytes();
            kv.put(&key, b"v");
            expected.insert(key);
        }
        kv.remove(b"key000");
        kv.remove(b"key199");
        expected.remove(&b"key000"[..]);
        expected.remove(&b"key199"[..]);

        let mut seen = Vec::new();
        kv.all(|key| seen.push(key.to_vec())).unwrap();
        assert_eq!(seen.len(), expected.len(), "each key exactly once");
        let seen: BTreeSet<_> = seen.into_iter().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn each_passes_matching_values() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));

        for i in 0..100 {
            kv.put(format!("key{i:03}").as_bytes(), format!("value{i}").as_bytes());
        }

        let mut pairs = Vec::new();
        kv.each(|key, value| pairs.push((key.to_vec(), value.to_vec()))).unwrap();
        assert_eq!(pairs.len(), 100);
        for (key, value) in pairs {
            let i: usize = std::str::from_utf8(&key[3..]).unwrap().parse().unwrap();
            assert_eq!(value, format!("value{i}").into_bytes());
        }
    }

    #[test]
    fn iteration_order_is_stable_for_a_fixed_pool() {
        let dir = tempdir().unwrap();
        let mut kv = open_engine(&dir.path().join("pool"));
        for i in 0..100 {
            kv.put(format!("k{i}").as_bytes(), b"v");
        }

        let mut first = Vec::new();
        kv.all(|key| first.push(key.to_vec())).unwrap();
        let mut second = Vec::new();
        kv.all(|key| second.push(key.to_vec())).unwrap();
        assert_eq!(first, second);
    }
}

mod engine_identity {
    use super::*;

    #[test]
    fn name_is_tree3() {
        let dir = tempdir().unwrap();
        let kv = open_engine(&dir.path().join("pool"));
        assert_eq!(kv.name(), "tree3");
    }

    #[test]
    fn open_without_file_and_zero_size_fails() {
        let dir = tempdir().unwrap();
        assert!(Tree3::open(ptr::null_mut(), &dir.path().join("absent"), 0).is_err());
    }
}
