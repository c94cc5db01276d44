//! End-to-end scenarios driving `Store` through a temp-directory-backed file pair.

use simplekv::{Store, key_from_str, value_from_str};

fn open(dir: &tempfile::TempDir) -> Store {
    Store::open_at(dir.path().join("kv")).unwrap()
}

#[test]
fn eviction_never_loses_an_unflushed_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = simplekv::StoreConfig::at_path(dir.path().join("kv"));
    config.buffer_capacity = 8;
    let store = Store::open(config).unwrap();

    for i in 0..8u32 {
        let s = format!("k{i:03}");
        store.write(key_from_str(&s), value_from_str(&s)).unwrap();
    }
    // One more write than capacity: nothing should be lost, and the
    // buffer must never have evicted a dirty (unflushed) entry.
    store.write(key_from_str("k008"), value_from_str("k008")).unwrap();

    for i in 0..=8u32 {
        let s = format!("k{i:03}");
        assert_eq!(store.read(&key_from_str(&s)).unwrap(), Some(value_from_str(&s)), "lost key {s}");
    }
    assert!(store.num_buffer_entries() <= 8);
}

#[test]
fn partial_transaction_commits_and_subsequent_one_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv");
    {
        let store = Store::open_at(&path).unwrap();
        store.begin_tx().unwrap();
        for i in 0..50u32 {
            let s = i.to_string();
            store.write(key_from_str(&s), value_from_str(&s)).unwrap();
        }
        store.commit().unwrap();

        store.begin_tx().unwrap();
        for i in 0..50u32 {
            let s = i.to_string();
            store.write(key_from_str(&s), value_from_str(&(i + 1).to_string())).unwrap();
        }
        // crash: no commit
    }
    let store = Store::open_at(&path).unwrap();
    store.begin_tx().unwrap();
    for i in 0..50u32 {
        let s = i.to_string();
        assert_eq!(store.read(&key_from_str(&s)).unwrap(), Some(value_from_str(&s)));
    }
}

#[test]
fn round_trip_durability_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv");
    {
        let store = open(&dir);
        store.begin_tx().unwrap();
        for i in 0..64u32 {
            let s = format!("key-{i:04}");
            store.write(key_from_str(&s), value_from_str(&s)).unwrap();
        }
        store.commit().unwrap();
        assert_eq!(store.size(), 64);
        let _ = &path;
    }
    let store = Store::open_at(&path).unwrap();
    assert_eq!(store.size(), 64);
    for i in 0..64u32 {
        let s = format!("key-{i:04}");
        assert_eq!(store.read(&key_from_str(&s)).unwrap(), Some(value_from_str(&s)));
    }
}

#[test]
fn null_arguments_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let err = store.write(Vec::new(), value_from_str("v")).unwrap_err();
    assert!(matches!(err, simplekv::KvError::NullArgument(_)));
}
