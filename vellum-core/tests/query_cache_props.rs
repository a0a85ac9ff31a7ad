// query_cache_props.rs
// Property tests for query fingerprints and cache coherence

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use vellum_core::{Document, FindOptions, QueryHash, QueryCache};
use vellum_core::storage::LiveIndex;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn filter() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}", scalar(), 0..6).prop_map(|fields| {
        Value::Object(fields.into_iter().collect::<Map<String, Value>>())
    })
}

fn options() -> impl Strategy<Value = FindOptions> {
    (
        prop::option::of(0usize..50),
        prop::option::of(0usize..50),
        prop::option::of(("[a-z]{1,6}", prop_oneof![Just(1), Just(-1)])),
    )
        .prop_map(|(skip, limit, sort)| {
            let mut options = FindOptions::new();
            options.skip = skip;
            options.limit = limit;
            if let Some((field, direction)) = sort {
                options = options.with_sort(field, direction);
            }
            options
        })
}

proptest! {
    #[test]
    fn prop_hash_is_deterministic(f in filter(), o in options()) {
        prop_assert_eq!(QueryHash::new(&f, &o), QueryHash::new(&f.clone(), &o.clone()));
    }

    #[test]
    fn prop_hash_ignores_member_order(fields in prop::collection::vec(("[a-z]{1,6}", scalar()), 0..6)) {
        let forward: Map<String, Value> = fields.iter().cloned().collect();
        let backward: Map<String, Value> = fields.iter().rev().cloned().collect();
        // Later duplicates win on collect, so only compare when keys are unique
        prop_assume!(forward.len() == fields.len());
        prop_assert_eq!(
            QueryHash::new(&Value::Object(forward), &FindOptions::new()),
            QueryHash::new(&Value::Object(backward), &FindOptions::new())
        );
    }

    #[test]
    fn prop_distinct_filters_rarely_collide(a in filter(), b in filter()) {
        prop_assume!(a != b);
        prop_assert_ne!(
            QueryHash::new(&a, &FindOptions::new()),
            QueryHash::new(&b, &FindOptions::new())
        );
    }

    #[test]
    fn prop_cache_hit_matches_live_index(ids in prop::collection::btree_set("[a-z]{1,4}", 1..20)) {
        let mut index = LiveIndex::new();
        for id in &ids {
            index.insert(id.clone(), Document::from_value(json!({"id": id})).unwrap());
        }
        let cache = QueryCache::new(8);
        let hash = QueryHash::new(&json!({}), &FindOptions::new());
        let docs: Vec<Document> = index.values().cloned().collect();
        cache.set(hash, &docs);

        prop_assert_eq!(cache.get(&hash, &index), Some(docs));

        let gone = ids.iter().next().unwrap().clone();
        index.shift_remove(&gone);
        prop_assert_eq!(cache.get(&hash, &index), None);
    }
}
