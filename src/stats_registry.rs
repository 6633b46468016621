use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::CacheStats;

/// Global registry for cache statistics.
///
/// Side-by-side policy comparisons run several cache instances in the same
/// process (usually one per thread); the registry lets the driver's metrics
/// reporter enumerate all of them by name without holding references to the
/// cache values themselves.
///
/// Every cache registers its stats handle at `init` under its instance name
/// (`"<policy>#<n>"`, or the configured `cache_name`) and unregisters on
/// drop, so the registry never outlives the counters it points at.
///
/// # Examples
///
/// ```
/// use cachesim::{stats_registry, Cache, CommonParams, Request};
///
/// let mut cache = Cache::init("fifo", CommonParams::new(100), "").unwrap();
/// cache.get(&Request::new(1, 10, 0));
///
/// let stats = stats_registry::get(cache.name()).unwrap();
/// assert_eq!(stats.n_req(), 1);
/// ```
static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a cache's statistics under a given name.
///
/// Called automatically by [`crate::Cache::init`].
pub fn register(name: &str, stats: Arc<CacheStats>) {
    let mut registry = STATS_REGISTRY.write();
    registry.insert(name.to_string(), stats);
}

/// Remove a cache's statistics from the registry.
///
/// Called automatically when a cache is dropped. Returns `true` if an entry
/// was removed.
pub fn unregister(name: &str) -> bool {
    let mut registry = STATS_REGISTRY.write();
    registry.remove(name).is_some()
}

/// Get a snapshot of the statistics for a cache by name.
///
/// Returns a cloned snapshot taken at the time of the call.
pub fn get(name: &str) -> Option<CacheStats> {
    let registry = STATS_REGISTRY.read();
    registry.get(name).map(|stats| (**stats).clone())
}

/// Get a shared handle to the live statistics for a cache by name.
pub fn get_handle(name: &str) -> Option<Arc<CacheStats>> {
    let registry = STATS_REGISTRY.read();
    registry.get(name).cloned()
}

/// List all registered cache names.
pub fn list() -> Vec<String> {
    let registry = STATS_REGISTRY.read();
    registry.keys().cloned().collect()
}

/// Reset the counters of a registered cache. Returns `false` if the name is
/// unknown.
pub fn reset(name: &str) -> bool {
    let registry = STATS_REGISTRY.read();
    if let Some(stats) = registry.get(name) {
        stats.reset();
        true
    } else {
        false
    }
}

/// Clear all registrations. The counters themselves are untouched; caches
/// keep their own handles. Useful in tests.
pub fn clear() {
    let mut registry = STATS_REGISTRY.write();
    registry.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_register_and_get() {
        let stats = Arc::new(CacheStats::new());
        register("reg_test_a", Arc::clone(&stats));

        stats.record_request(1, true);
        let snapshot = get("reg_test_a").unwrap();
        assert_eq!(snapshot.n_hit(), 1);

        assert!(unregister("reg_test_a"));
        assert!(get("reg_test_a").is_none());
    }

    #[test]
    #[serial]
    fn test_get_handle_is_live() {
        let stats = Arc::new(CacheStats::new());
        register("reg_test_b", Arc::clone(&stats));

        let handle = get_handle("reg_test_b").unwrap();
        stats.record_request(1, false);
        assert_eq!(handle.n_miss(), 1);

        unregister("reg_test_b");
    }

    #[test]
    #[serial]
    fn test_list_and_reset() {
        clear();
        register("reg_test_c", Arc::new(CacheStats::new()));
        register("reg_test_d", Arc::new(CacheStats::new()));

        let names = list();
        assert!(names.contains(&"reg_test_c".to_string()));
        assert!(names.contains(&"reg_test_d".to_string()));

        assert!(reset("reg_test_c"));
        assert!(!reset("nonexistent"));

        clear();
        assert!(list().is_empty());
    }
}
