//! Plugin wiring: an in-process LRU hook table must be indistinguishable
//! from the built-in LRU policy through the driver interface.

use std::collections::VecDeque;
use std::ffi::c_void;

use cachesim::{
    Cache, CacheError, CommonParams, PluginHooks, PluginPolicy, PluginRequest, Request,
    PLUGIN_ABI_VERSION,
};

// An LRU policy implemented purely behind the hook surface. The opaque
// pointer owns the recency queue.
type LruState = VecDeque<u64>;

extern "C" fn lru_init(_capacity: u64, _ttl: u64) -> *mut c_void {
    Box::into_raw(Box::new(LruState::new())) as *mut c_void
}

extern "C" fn lru_hit(data: *mut c_void, req: PluginRequest) {
    let state = unsafe { &mut *(data as *mut LruState) };
    if let Some(pos) = state.iter().position(|&id| id == req.obj_id) {
        state.remove(pos);
        state.push_back(req.obj_id);
    }
}

extern "C" fn lru_miss(data: *mut c_void, req: PluginRequest) {
    let state = unsafe { &mut *(data as *mut LruState) };
    state.push_back(req.obj_id);
}

extern "C" fn lru_eviction(data: *mut c_void, _req: PluginRequest) -> u64 {
    let state = unsafe { &mut *(data as *mut LruState) };
    state.pop_front().unwrap_or(u64::MAX)
}

extern "C" fn lru_remove(data: *mut c_void, obj_id: u64) {
    let state = unsafe { &mut *(data as *mut LruState) };
    state.retain(|&id| id != obj_id);
}

extern "C" fn lru_free(data: *mut c_void) {
    drop(unsafe { Box::from_raw(data as *mut LruState) });
}

fn lru_hooks() -> PluginHooks {
    PluginHooks {
        abi_version: PLUGIN_ABI_VERSION,
        init: lru_init,
        hit: lru_hit,
        miss: lru_miss,
        eviction: lru_eviction,
        remove: lru_remove,
        free: lru_free,
    }
}

fn lru_plugin_cache(capacity: u64) -> Cache {
    let common = CommonParams::new(capacity);
    let policy = PluginPolicy::from_hooks(&common, lru_hooks(), Some("lru-plugin".to_string()))
        .unwrap();
    Cache::with_policy(common, Box::new(policy))
}

/// The reference trace: one hit, final residency matching the LRU policy.
#[test]
fn test_lru_plugin_reference_trace() {
    let mut cache = lru_plugin_cache(3);
    let (a, b, c, d) = (1, 2, 3, 4);

    assert!(!cache.get(&Request::new(a, 1, 0)));
    assert!(!cache.get(&Request::new(b, 1, 1)));
    assert!(!cache.get(&Request::new(c, 1, 2)));
    assert!(cache.get(&Request::new(a, 1, 3)));
    assert!(!cache.get(&Request::new(d, 1, 4)));

    let mut resident = cache.resident_ids();
    resident.sort_unstable();
    assert_eq!(resident, vec![a, c, d]);

    let stats = cache.stats();
    assert_eq!(stats.n_req(), 5);
    assert_eq!(stats.n_hit(), 1);
    assert_eq!(stats.n_eviction(), 1);
}

/// Driver-reported results are identical to the built-in LRU across a
/// randomized trace.
#[test]
fn test_plugin_matches_builtin_lru() {
    let mut plugin = lru_plugin_cache(32);
    let mut builtin = Cache::init("lru", CommonParams::new(32), "").unwrap();

    let mut rng = fastrand::Rng::with_seed(17);
    for t in 0..4000u64 {
        let req = Request::new(rng.u64(..120), 1, t);
        assert_eq!(plugin.get(&req), builtin.get(&req), "request {t}");
        assert_eq!(plugin.occupied_bytes(), builtin.occupied_bytes());
    }

    let mut a = plugin.resident_ids();
    let mut b = builtin.resident_ids();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);

    assert_eq!(plugin.stats().n_hit(), builtin.stats().n_hit());
    assert_eq!(plugin.stats().n_eviction(), builtin.stats().n_eviction());
}

/// Explicit removal flows through the remove hook and the shared store.
#[test]
fn test_plugin_remove_stays_consistent() {
    let mut cache = lru_plugin_cache(4);
    for t in 0..4u64 {
        cache.get(&Request::new(t, 1, t));
    }
    assert!(cache.remove(2));
    assert!(!cache.remove(2));
    assert_eq!(cache.n_obj(), 3);

    // The freed slot is usable and the hook queue did not retain id 2
    cache.get(&Request::new(9, 1, 10));
    assert_eq!(cache.n_obj(), 4);
    cache.get(&Request::new(10, 1, 11)); // evicts LRU head, not the removed id
    assert!(cache.occupied_bytes() <= 4);
}

/// The configured cache name flows into the stats registry.
#[test]
fn test_plugin_cache_name_registered() {
    let cache = lru_plugin_cache(4);
    assert!(cache.name().starts_with("lru-plugin#"));
    assert!(cachesim::stats_registry::get(cache.name()).is_some());
}

/// `to_evict` cannot be supported through the hook surface.
#[test]
fn test_plugin_to_evict_not_supported() {
    let mut cache = lru_plugin_cache(4);
    cache.get(&Request::new(1, 1, 0));
    let err = cache.to_evict(&Request::new(2, 1, 1)).unwrap_err();
    assert!(matches!(err, CacheError::NotSupported(_, _)));
}
