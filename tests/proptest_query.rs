//! Property tests for count, paginate and chunk over random galaxy sets.

use proptest::prelude::*;
use starchart::query::{self, Direction, Op, PageRequest, Query};
use starchart::store::{Backend, MemoryBackend};
use starchart::Galaxy;
use std::collections::HashSet;

fn arb_age() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(0i64..20)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn load(ages: &[Option<i64>]) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let mut exec = backend.executor();
    for (i, age) in ages.iter().enumerate() {
        let g = Galaxy {
            age: *age,
            ..Galaxy::new(format!("Galaxy {:03}", i))
        };
        query::create(&mut *exec, &g).await.unwrap();
    }
    backend
}

proptest! {
    /// Property: count equals the number of rows all() returns, for any threshold
    #[test]
    fn prop_count_matches_all(ages in prop::collection::vec(arb_age(), 0..40), threshold in 0i64..20) {
        let (count, all, expected) = runtime().block_on(async {
            let backend = load(&ages).await;
            let mut exec = backend.executor();
            let q = Query::<Galaxy>::new().filter("age", Op::Gte, threshold);
            let count = q.count(&mut *exec).await.unwrap();
            let all = q.all(&mut *exec).await.unwrap();
            let expected = ages.iter().filter(|a| matches!(a, Some(v) if *v >= threshold)).count();
            (count, all.len(), expected)
        });
        prop_assert_eq!(count as usize, all);
        prop_assert_eq!(all, expected);
    }

    /// Property: pages partition the result; every record appears on exactly one page
    #[test]
    fn prop_pages_partition_results(ages in prop::collection::vec(arb_age(), 0..40), per in 1u64..12) {
        let (total, pages) = runtime().block_on(async {
            let backend = load(&ages).await;
            let mut exec = backend.executor();
            let q = Query::<Galaxy>::new().sort("age", Direction::Desc);
            let mut pages = Vec::new();
            let mut total = 0;
            for page in 1.. {
                let p = q.paginate(&mut *exec, PageRequest::new(page, per)).await.unwrap();
                total = p.metadata.total;
                if p.items.is_empty() {
                    break;
                }
                pages.push(p.items);
            }
            (total, pages)
        });
        prop_assert_eq!(total as usize, ages.len());
        prop_assert!(pages.iter().all(|p| p.len() as u64 <= per));
        let ids: Vec<_> = pages.iter().flatten().map(|g| g.id).collect();
        let distinct: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(ids.len(), ages.len());
        prop_assert_eq!(distinct.len(), ages.len());
    }

    /// Property: chunk visits every match once in batches no larger than max
    #[test]
    fn prop_chunk_covers_matches(ages in prop::collection::vec(arb_age(), 0..40), max in 1usize..9) {
        let (summary, sizes, seen, expected) = runtime().block_on(async {
            let backend = load(&ages).await;
            let mut exec = backend.executor();
            let q = Query::<Galaxy>::new().filter("age", Op::Lt, 10);
            let expected = q.count(&mut *exec).await.unwrap();
            let mut sizes = Vec::new();
            let mut seen = HashSet::new();
            let summary = q
                .chunk(&mut *exec, max, |batch| {
                    sizes.push(batch.len());
                    seen.extend(batch.into_iter().map(|r| r.unwrap().id));
                })
                .await
                .unwrap();
            (summary, sizes, seen, expected)
        });
        prop_assert_eq!(summary.records, expected);
        prop_assert_eq!(seen.len() as u64, expected);
        prop_assert_eq!(sizes.iter().sum::<usize>() as u64, expected);
        prop_assert!(sizes.iter().all(|s| *s >= 1 && *s <= max));
        prop_assert_eq!(summary.failures, 0);
    }
}
