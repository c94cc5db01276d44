//! Property-based invariants over the leaf chain and range queries.

use proptest::prelude::*;
use simplekv::{Store, key_from_str, value_from_str};

fn distinct_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{i:06}")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn leaf_chain_visits_every_key_once_in_order(mut order in prop::collection::vec(0usize..40, 40)) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("kv")).unwrap();
        let keys = distinct_keys(40);
        order.sort();
        order.dedup();

        for &i in &order {
            store.write(key_from_str(&keys[i]), value_from_str(&keys[i])).unwrap();
        }
        store.flush().unwrap();

        let lo = key_from_str("000000");
        let hi = key_from_str("999999");
        let observed = store.read_range(&lo, &hi).unwrap();

        let mut expected: Vec<_> = order.iter().map(|&i| keys[i].clone()).collect();
        expected.sort();
        expected.dedup();

        let observed_keys: Vec<String> =
            observed.iter().map(|(k, _)| String::from_utf16(k).unwrap()).collect();
        prop_assert_eq!(observed_keys, expected);
    }

    #[test]
    fn most_recent_write_wins(values in prop::collection::vec("[a-z]{1,6}", 1..10)) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("kv")).unwrap();
        let key = key_from_str("the-key");
        for v in &values {
            store.write(key.clone(), value_from_str(v)).unwrap();
        }
        let last = values.last().unwrap();
        prop_assert_eq!(store.read(&key).unwrap(), Some(value_from_str(last)));
    }
}
