//! # Property-Based Tests
//!
//! Identity, query and canonical export invariants checked with proptest.

use grove_core::{
    CanonicalGraph, EdgeQuery, EdgeTriple, EngineSpec, GraphEngine, NodeId, RecordFilter,
    StoreRegistry, VolatileBackend,
};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn engine() -> Arc<GraphEngine> {
    let spec: EngineSpec = serde_json::from_value(json!({
        "key": "web",
        "top": "links",
        "types": [{
            "name": "Page",
            "fields": [{ "name": "rank", "type": { "kind": "number" } }],
            "relations": [
                { "predicate": "links", "target": "Page" },
                { "predicate": "cites", "target": "Page" }
            ]
        }]
    }))
    .expect("spec");
    Arc::new(GraphEngine::new(spec).expect("engine"))
}

/// Integral numbers written as i64, u64 or f64, clustered around 2^53
/// where f64 stops being exact.
fn mixed_number() -> impl Strategy<Value = Value> {
    const EDGE: i64 = 1 << 53;
    prop_oneof![
        (-(1i64 << 60)..(1i64 << 60)).prop_map(|n| json!(n)),
        (-(1i64 << 60)..(1i64 << 60)).prop_map(|n| json!(n as f64)),
        (EDGE - 4..EDGE + 4).prop_map(|n| json!(n)),
        (EDGE - 4..EDGE + 4).prop_map(|n| json!(n as f64)),
        (9_223_372_036_854_775_808u64..=u64::MAX).prop_map(|n| json!(n)),
    ]
}

/// The exact value of a number produced by `mixed_number`.
fn exact(value: &Value) -> i128 {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
        .or_else(|| value.as_f64().map(|f| f as i128))
        .expect("number")
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Edge identities decode back to the triple they came from.
    #[test]
    fn identity_decodes_to_its_triple(
        subject in ".{0,12}",
        predicate in "[a-z|%]{1,8}",
        object in ".{0,12}"
    ) {
        let triple = EdgeTriple::new(subject, predicate, object);
        let decoded = EdgeTriple::from_identity(&triple.identity()).expect("decode");
        prop_assert_eq!(decoded, triple);
    }

    /// Distinct triples never share an identity.
    #[test]
    fn distinct_triples_have_distinct_identities(
        a in ("[ab|]{0,3}", "[ab|]{1,3}", "[ab|]{0,3}"),
        b in ("[ab|]{0,3}", "[ab|]{1,3}", "[ab|]{0,3}")
    ) {
        let ta = EdgeTriple::new(a.0, a.1, a.2);
        let tb = EdgeTriple::new(b.0, b.1, b.2);
        prop_assert_eq!(ta == tb, ta.identity() == tb.identity());
    }

    /// Stored node data comes back unchanged.
    #[test]
    fn node_data_survives_the_store(ranks in vec(0u64..1_000_000, 1..20)) {
        let rt = runtime();
        rt.block_on(async {
            let registry = StoreRegistry::new();
            let store = registry.open(engine(), Box::new(VolatileBackend::new()));
            for (i, rank) in ranks.iter().enumerate() {
                store.put_node(format!("p{}", i), "Page", json!({ "rank": rank })).await.expect("put");
            }
            for (i, rank) in ranks.iter().enumerate() {
                let mut node = store
                    .fetch_node(&NodeId::new(format!("p{}", i)))
                    .await
                    .expect("fetch")
                    .expect("present");
                assert_eq!(node.data().await.expect("data"), json!({ "rank": rank }));
            }
        });
    }

    /// A predicate query returns exactly the edges stored under it.
    #[test]
    fn query_returns_exactly_matching_edges(
        edges in btree_set((0u8..6, prop::bool::ANY, 0u8..6), 0..30)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let registry = StoreRegistry::new();
            let store = registry.open(engine(), Box::new(VolatileBackend::new()));
            for (s, links, o) in &edges {
                let predicate = if *links { "links" } else { "cites" };
                store
                    .put_edge(EdgeTriple::new(format!("p{}", s), predicate, format!("p{}", o)), Value::Null)
                    .await
                    .expect("edge");
            }

            let expected: BTreeSet<String> = edges
                .iter()
                .filter(|(_, links, _)| *links)
                .map(|(s, _, o)| EdgeTriple::new(format!("p{}", s), "links", format!("p{}", o)).identity())
                .collect();
            let found: BTreeSet<String> = store
                .query_edges(&EdgeQuery::new("links"))
                .await
                .expect("query")
                .iter()
                .map(|e| e.triple().identity())
                .collect();
            assert_eq!(found, expected);
        });
    }

    /// Insertion order does not change the canonical form.
    #[test]
    fn canonical_form_ignores_insertion_order(ids in btree_set(0u16..500, 1..25)) {
        let rt = runtime();
        rt.block_on(async {
            let registry = StoreRegistry::new();
            let forward = registry.open(engine(), Box::new(VolatileBackend::new()));
            let backward = registry.open(engine(), Box::new(VolatileBackend::new()));
            for id in &ids {
                forward.put_node(format!("p{}", id), "Page", json!({ "rank": id })).await.expect("put");
            }
            for id in ids.iter().rev() {
                backward.put_node(format!("p{}", id), "Page", json!({ "rank": id })).await.expect("put");
            }
            let a = CanonicalGraph::from_store(&forward).await.expect("canonical");
            let b = CanonicalGraph::from_store(&backward).await.expect("canonical");
            assert_eq!(a.checksum(), b.checksum());
            assert_eq!(a, b);
        });
    }

    /// Sorting mixed integer and float fields follows their exact values.
    #[test]
    fn sort_orders_mixed_numbers_exactly(values in vec(mixed_number(), 0..40)) {
        let mut filter = RecordFilter::new("Page").sort_by("rank", false);
        filter.build().expect("build");
        let items: Vec<Value> = values.iter().map(|v| json!({ "rank": v })).collect();

        let sorted = filter.apply(items.clone(), Value::Null).expect("apply");
        let keys: Vec<i128> = sorted.iter().map(|item| exact(&item["rank"])).collect();
        prop_assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]), "out of order: {:?}", keys);

        let reversed = filter
            .apply(items.into_iter().rev().collect(), Value::Null)
            .expect("apply");
        let again: Vec<i128> = reversed.iter().map(|item| exact(&item["rank"])).collect();
        prop_assert_eq!(keys, again);
    }
}
