use kagami_core::{FilterDefaults, FilterState, QueryKey, QueryResponse};
use kagami_store::ResultCache;

fn key(page: u32) -> QueryKey {
    let d = FilterDefaults::default();
    QueryKey::derive(&FilterState::new(&d).with_page(page), &d)
}

#[test]
fn never_exceeds_capacity_and_evicts_oldest_first() {
    let cap = 10;
    let mut cache: ResultCache = ResultCache::with_capacity(cap);
    for page in 1..=25u32 {
        cache.put(key(page), QueryResponse { total: u64::from(page), ..Default::default() });
        assert!(cache.len() <= cap);
        if page as usize > cap {
            let oldest_alive = page - cap as u32 + 1;
            assert!(!cache.contains(&key(oldest_alive - 1)), "page {} should be gone", oldest_alive - 1);
            assert_eq!(cache.keys().next(), Some(&key(oldest_alive)));
        }
    }
    assert_eq!(cache.len(), cap);
    assert_eq!(cache.evicted(), 15);
}

#[test]
fn consumed_entries_free_room() {
    let mut cache: ResultCache = ResultCache::with_capacity(2);
    cache.put(key(1), QueryResponse::default());
    cache.put(key(2), QueryResponse::default());
    assert!(cache.take(&key(1)).is_some());
    cache.put(key(3), QueryResponse::default());
    assert_eq!(cache.evicted(), 0);
    assert!(cache.contains(&key(2)) && cache.contains(&key(3)));
}
