//! GDSF behavior: priority ordering, aging floor, tie-breaking and the
//! optional admission check.

use cachesim::{Cache, CacheError, CommonParams, Request};

fn unit_req(id: u64, time: u64) -> Request {
    Request::new(id, 1, time)
}

fn pri_last_evict_milli(cache: &Cache) -> u64 {
    cache
        .policy_counters()
        .into_iter()
        .find(|(name, _)| *name == "pri_last_evict_milli")
        .map(|(_, value)| value)
        .unwrap()
}

/// Frequent objects survive; the aging floor rises with evictions.
#[test]
fn test_frequency_protects_objects() {
    // Trace A B C A A D E with unit sizes and capacity 3
    let mut cache = Cache::init("gdsf", CommonParams::new(3), "").unwrap();
    let (a, b, c, d, e) = (1, 2, 3, 4, 5);

    assert!(!cache.get(&unit_req(a, 0)));
    assert!(!cache.get(&unit_req(b, 1)));
    assert!(!cache.get(&unit_req(c, 2)));
    assert!(cache.get(&unit_req(a, 3)));
    assert!(cache.get(&unit_req(a, 4)));

    assert_eq!(pri_last_evict_milli(&cache), 0);

    // D evicts the oldest freq-1 object (B, by admission order)
    assert!(!cache.get(&unit_req(d, 5)));
    assert!(!cache.contains(b));
    let floor_after_first = pri_last_evict_milli(&cache);
    assert!(floor_after_first > 0);

    // E evicts C; A has accumulated frequency 3 and survives
    assert!(!cache.get(&unit_req(e, 6)));
    assert!(!cache.contains(c));
    assert!(cache.contains(a));
    assert!(cache.contains(d));
    assert!(cache.contains(e));

    assert!(pri_last_evict_milli(&cache) >= floor_after_first);
}

/// The aging floor never decreases over a long mixed trace.
#[test]
fn test_aging_floor_is_monotone() {
    let mut cache = Cache::init("gdsf", CommonParams::new(64), "").unwrap();
    let mut rng = fastrand::Rng::with_seed(11);
    let mut last_floor = 0;
    for t in 0..4000u64 {
        let id = rng.u64(..300);
        cache.get(&Request::new(id, 1 + id % 9, t));
        let floor = pri_last_evict_milli(&cache);
        assert!(floor >= last_floor, "aging floor decreased at request {t}");
        last_floor = floor;
    }
    assert!(last_floor > 0);
}

/// Small objects outrank large ones at equal frequency.
#[test]
fn test_size_aware_eviction() {
    let mut cache = Cache::init("gdsf", CommonParams::new(12), "").unwrap();
    cache.get(&Request::new(1, 1, 0)); // small
    cache.get(&Request::new(2, 10, 1)); // large
    cache.get(&Request::new(3, 10, 2)); // forces eviction

    assert!(cache.contains(1));
    assert!(!cache.contains(2));
    assert!(cache.contains(3));
}

/// Equal priorities evict in admission order.
#[test]
fn test_fifo_tie_break() {
    let mut cache = Cache::init("gdsf", CommonParams::new(3), "").unwrap();
    cache.get(&unit_req(1, 0));
    cache.get(&unit_req(2, 1));
    cache.get(&unit_req(3, 2));
    cache.get(&unit_req(4, 3)); // all freq 1: evicts the earliest admitted

    assert!(!cache.contains(1));
    assert!(cache.contains(2));
}

/// `to_evict` peeks the minimum-priority object without removing it.
#[test]
fn test_to_evict_peeks_minimum() {
    let mut cache = Cache::init("gdsf", CommonParams::new(10), "").unwrap();
    cache.get(&Request::new(1, 1, 0));
    cache.get(&Request::new(2, 8, 1)); // lowest priority: large, freq 1

    assert_eq!(cache.to_evict(&unit_req(9, 2)).unwrap(), Some(2));
    assert!(cache.contains(2));
}

/// With the admission check enabled, an object that would sit at the
/// eviction frontier is not admitted at all.
#[test]
fn test_admission_check_skips_doomed_objects() {
    let mut cache =
        Cache::init("gdsf", CommonParams::new(10), "admission-check=true").unwrap();
    // Ten unit objects, each hit once: priorities well above a cold large
    // object's
    for t in 0..10u64 {
        cache.get(&unit_req(t, t));
    }
    for t in 0..10u64 {
        cache.get(&unit_req(t, 10 + t));
    }

    // Incoming priority 1e6/8 is below the resident minimum: skipped
    assert!(!cache.get(&Request::new(100, 8, 20)));
    assert!(!cache.contains(100));
    assert_eq!(cache.n_obj(), 10);

    let skips = cache
        .policy_counters()
        .into_iter()
        .find(|(name, _)| *name == "n_admission_skips")
        .map(|(_, value)| value)
        .unwrap();
    assert_eq!(skips, 1);
}

/// The admission check is off by default: the doomed object is admitted,
/// becomes the priority minimum and is evicted right back out, raising the
/// aging floor.
#[test]
fn test_admission_check_defaults_off() {
    let mut cache = Cache::init("gdsf", CommonParams::new(10), "").unwrap();
    for t in 0..10u64 {
        cache.get(&unit_req(t, t));
    }
    for t in 0..10u64 {
        cache.get(&unit_req(t, 10 + t));
    }
    assert!(!cache.get(&Request::new(100, 8, 20)));
    assert!(!cache.contains(100));
    assert_eq!(cache.stats().n_insert(), 11);
    assert_eq!(cache.stats().n_eviction(), 1);
    assert!(pri_last_evict_milli(&cache) > 0);
}

#[test]
fn test_unknown_param_is_fatal() {
    let err = Cache::init("gdsf", CommonParams::new(10), "beta=0.5").unwrap_err();
    assert!(matches!(err, CacheError::UnknownParam { .. }));
}
