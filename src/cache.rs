use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CacheError;
use crate::obj_store::{CacheObject, ObjectInfo, ObjectStore, PolicyState};
use crate::params::CommonParams;
use crate::policy::ReplacementPolicy;
use crate::request::Request;
use crate::stats::CacheStats;
use crate::stats_registry;

static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Shared per-instance bookkeeping: capacity, occupancy, the logical clock
/// and the object store.
///
/// The core is deliberately policy-agnostic. Policies receive `&mut
/// CacheCore` and go through [`admit_base`](Self::admit_base) and
/// [`remove_base`](Self::remove_base) for every residency change, which is
/// what keeps `occupied_bytes` equal to the sum of resident object sizes at
/// every `get` boundary.
#[derive(Debug)]
pub struct CacheCore {
    capacity: u64,
    occupied_bytes: u64,
    n_req: u64,
    default_ttl: Option<u64>,
    consider_obj_metadata: bool,
    obj_md_size: u64,
    store: ObjectStore,
    stats: Arc<CacheStats>,
}

impl CacheCore {
    fn new(common: &CommonParams) -> Self {
        Self {
            capacity: common.capacity_bytes,
            occupied_bytes: 0,
            n_req: 0,
            default_ttl: common.default_ttl,
            consider_obj_metadata: common.consider_obj_metadata,
            obj_md_size: 0,
            store: ObjectStore::new(),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Configured capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently accounted against the capacity.
    #[inline]
    pub fn occupied_bytes(&self) -> u64 {
        self.occupied_bytes
    }

    /// Number of resident objects.
    #[inline]
    pub fn n_obj(&self) -> u64 {
        self.store.len() as u64
    }

    /// The logical clock: number of requests processed so far. This is the
    /// sole time source for priorities, reuse distances, sampling and
    /// eviction ages.
    #[inline]
    pub fn now(&self) -> u64 {
        self.n_req
    }

    #[inline]
    pub(crate) fn tick(&mut self) {
        self.n_req += 1;
    }

    /// The byte size an object is accounted at, including per-object
    /// policy metadata when enabled.
    #[inline]
    pub fn weighted_size(&self, size: u64) -> u64 {
        if self.consider_obj_metadata {
            size + self.obj_md_size
        } else {
            size
        }
    }

    pub(crate) fn set_obj_md_size(&mut self, md_size: u64) {
        self.obj_md_size = md_size;
    }

    /// Read access to the object store.
    #[inline]
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    #[inline]
    pub(crate) fn store_mut(&mut self) -> &mut ObjectStore {
        &mut self.store
    }

    #[inline]
    pub(crate) fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn stats_handle(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Creates the record for a missed object and charges its bytes.
    /// Callers are responsible for having space made available afterwards
    /// (the `get` loop evicts until `occupied_bytes <= capacity`).
    pub(crate) fn admit_base(&mut self, req: &Request, state: PolicyState) -> ObjectInfo {
        let size = self.weighted_size(req.size);
        let obj = CacheObject {
            obj_id: req.obj_id,
            size,
            create_time: self.n_req,
            enter_time: req.time,
            policy_state: state,
        };
        let info = obj.info();
        self.store.insert(obj);
        self.occupied_bytes += size;
        self.stats.record_insert();
        info
    }

    /// Removes a record and releases its bytes. `is_eviction` controls
    /// whether the removal counts towards eviction statistics and the
    /// eviction-age histogram.
    pub(crate) fn remove_base(&mut self, obj_id: u64, is_eviction: bool) -> Option<CacheObject> {
        let obj = self.store.remove(obj_id)?;
        self.occupied_bytes -= obj.size;
        if is_eviction {
            self.stats.record_eviction(self.n_req - obj.create_time);
        }
        Some(obj)
    }

    pub(crate) fn is_expired(&self, obj: &CacheObject, req: &Request) -> bool {
        match self.default_ttl {
            Some(ttl) if ttl > 0 => req.time.saturating_sub(obj.enter_time) >= ttl,
            _ => false,
        }
    }
}

/// A simulated cache: shared bookkeeping plus one replacement policy.
///
/// A cache is stepped synchronously by a single driver: one `get` per trace
/// event, no internal threads, no suspension points. Multiple caches may
/// run in parallel threads for side-by-side comparisons; they share nothing
/// but the global [`stats_registry`].
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CommonParams, Request};
///
/// let mut cache = Cache::init("s3fifo", CommonParams::new(100), "").unwrap();
///
/// assert!(!cache.get(&Request::new(1, 10, 0))); // miss, admitted
/// assert!(cache.get(&Request::new(1, 10, 1))); // hit
/// assert_eq!(cache.occupied_bytes(), 10);
/// assert_eq!(cache.n_obj(), 1);
/// ```
pub struct Cache {
    core: CacheCore,
    policy: Box<dyn ReplacementPolicy>,
    name: String,
}

impl Cache {
    /// Constructs a cache from a policy name, common parameters and the
    /// policy's `key=value,key=value` parameter string.
    ///
    /// Known policy names: `fifo`, `lru`, `gdsf`, `s3fifo`, `3l-cache`,
    /// `plugin`. Configuration errors (unknown policy, unknown or invalid
    /// parameter, missing plugin path) are fatal for the caller.
    pub fn init(
        policy_name: &str,
        common: CommonParams,
        policy_params: &str,
    ) -> Result<Self, CacheError> {
        let policy = crate::policy::build(policy_name, &common, policy_params)?;
        Ok(Self::with_policy(common, policy))
    }

    /// Constructs a cache around an already-built policy value. This is the
    /// seam used by drivers that assemble policies programmatically (e.g.
    /// in-process plugin hook tables).
    pub fn with_policy(common: CommonParams, policy: Box<dyn ReplacementPolicy>) -> Self {
        let mut core = CacheCore::new(&common);
        core.set_obj_md_size(policy.obj_metadata_size());
        let name = format!(
            "{}#{}",
            policy.name(),
            INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        stats_registry::register(&name, core.stats_handle());
        debug!(
            cache = %name,
            capacity = common.capacity_bytes,
            "cache instance created"
        );
        Self { core, policy, name }
    }

    /// Processes one trace event: the hot path.
    ///
    /// 1. Look up the object, letting the policy refresh hit metadata.
    /// 2. On a hit, return `true`.
    /// 3. On a miss, admit the object if the policy allows it, then evict
    ///    until `occupied_bytes <= capacity`.
    pub fn get(&mut self, req: &Request) -> bool {
        let hit = self.find(req, true).is_some();
        self.core.stats().record_request(req.size, hit);
        if hit {
            return true;
        }
        if self.policy.can_insert(&self.core, req) {
            if self.policy.insert(&mut self.core, req).is_some() {
                while self.core.occupied_bytes() > self.core.capacity() {
                    self.policy.evict(&mut self.core, req);
                }
            }
        }
        false
    }

    /// Looks up an object. With `update = true` the logical clock advances
    /// and the policy refreshes per-hit metadata; with `update = false`
    /// this is a pure peek.
    ///
    /// Expired objects (when a TTL is configured) are removed and reported
    /// as a miss.
    pub fn find(&mut self, req: &Request, update: bool) -> Option<ObjectInfo> {
        if update {
            self.core.tick();
        }
        let expired = match self.core.store().get(req.obj_id) {
            Some(obj) => self.core.is_expired(obj, req),
            None => false,
        };
        if expired {
            self.policy.remove(&mut self.core, req.obj_id);
            return None;
        }
        self.policy.find(&mut self.core, req, update)
    }

    /// Admits an object without evicting. The caller is responsible for
    /// ensuring space is available; objects the policy cannot admit are
    /// rejected with a log line rather than silently.
    pub fn insert(&mut self, req: &Request) -> Option<ObjectInfo> {
        if !self.policy.can_insert(&self.core, req) {
            warn!(
                cache = %self.name,
                obj_id = req.obj_id,
                size = req.size,
                "object cannot be admitted"
            );
            return None;
        }
        self.policy.insert(&mut self.core, req)
    }

    /// Runs one eviction round under the policy.
    pub fn evict(&mut self, req: &Request) {
        self.policy.evict(&mut self.core, req);
    }

    /// Peeks the next eviction victim, for policies that support it.
    pub fn to_evict(&mut self, req: &Request) -> Result<Option<u64>, CacheError> {
        self.policy.to_evict(&mut self.core, req)
    }

    /// Explicitly removes an object. Returns `true` if it was resident.
    pub fn remove(&mut self, obj_id: u64) -> bool {
        self.policy.remove(&mut self.core, obj_id)
    }

    /// Bytes currently accounted against the capacity.
    #[inline]
    pub fn occupied_bytes(&self) -> u64 {
        self.core.occupied_bytes()
    }

    /// Number of resident objects.
    #[inline]
    pub fn n_obj(&self) -> u64 {
        self.core.n_obj()
    }

    /// Configured capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.core.capacity()
    }

    /// Requests processed so far (the logical clock).
    #[inline]
    pub fn n_req(&self) -> u64 {
        self.core.now()
    }

    /// Whether an object is currently resident.
    #[inline]
    pub fn contains(&self, obj_id: u64) -> bool {
        self.core.store().contains(obj_id)
    }

    /// Ids of all resident objects, unordered.
    pub fn resident_ids(&self) -> Vec<u64> {
        self.core.store().ids()
    }

    /// Shared handle to this cache's statistics.
    pub fn stats(&self) -> Arc<CacheStats> {
        self.core.stats_handle()
    }

    /// Policy-specific instrumentation counters.
    pub fn policy_counters(&self) -> Vec<(&'static str, u64)> {
        self.policy.counters()
    }

    /// The policy's name.
    pub fn policy_name(&self) -> String {
        self.policy.name().to_string()
    }

    /// The registry name of this instance.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        stats_registry::unregister(&self.name);
        debug!(cache = %self.name, "cache instance dropped");
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("capacity", &self.core.capacity())
            .field("occupied_bytes", &self.core.occupied_bytes())
            .field("n_obj", &self.core.n_obj())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: u64, size: u64, time: u64) -> Request {
        Request::new(id, size, time)
    }

    #[test]
    fn test_miss_then_hit() {
        let mut cache = Cache::init("fifo", CommonParams::new(100), "").unwrap();
        assert!(!cache.get(&req(1, 10, 0)));
        assert!(cache.get(&req(1, 10, 1)));
        assert_eq!(cache.n_obj(), 1);
        assert_eq!(cache.occupied_bytes(), 10);
    }

    #[test]
    fn test_eviction_keeps_occupancy_bounded() {
        let mut cache = Cache::init("fifo", CommonParams::new(30), "").unwrap();
        for i in 0..10 {
            cache.get(&req(i, 10, i));
            assert!(cache.occupied_bytes() <= 30);
        }
        assert_eq!(cache.n_obj(), 3);
    }

    #[test]
    fn test_oversized_object_rejected() {
        let mut cache = Cache::init("fifo", CommonParams::new(10), "").unwrap();
        assert!(!cache.get(&req(1, 100, 0)));
        assert_eq!(cache.n_obj(), 0);
        assert_eq!(cache.occupied_bytes(), 0);
        // Still a miss on re-request, never admitted
        assert!(!cache.get(&req(1, 100, 1)));
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut cache = Cache::init("fifo", CommonParams::new(10), "").unwrap();
        assert!(!cache.get(&req(1, 0, 0)));
        assert_eq!(cache.n_obj(), 0);
    }

    #[test]
    fn test_infinite_capacity_never_evicts() {
        let mut cache = Cache::init("lru", CommonParams::new(u64::MAX), "").unwrap();
        for i in 0..1000 {
            cache.get(&req(i % 100, 1000, i));
        }
        assert_eq!(cache.stats().n_eviction(), 0);
        assert_eq!(cache.n_obj(), 100);
    }

    #[test]
    fn test_ttl_expiry_reports_miss() {
        let common = CommonParams::new(100).with_ttl(5);
        let mut cache = Cache::init("lru", common, "").unwrap();
        assert!(!cache.get(&req(1, 10, 0)));
        assert!(cache.get(&req(1, 10, 4)));
        // Expired: removed and reported as a miss, then re-admitted
        assert!(!cache.get(&req(1, 10, 5)));
        assert_eq!(cache.n_obj(), 1);
        assert_eq!(cache.occupied_bytes(), 10);
    }

    #[test]
    fn test_explicit_remove_idempotent() {
        let mut cache = Cache::init("fifo", CommonParams::new(100), "").unwrap();
        cache.get(&req(1, 10, 0));
        assert!(cache.remove(1));
        assert!(!cache.remove(1));
        assert_eq!(cache.occupied_bytes(), 0);
    }

    #[test]
    fn test_driver_find_without_update_is_pure() {
        let mut cache = Cache::init("lru", CommonParams::new(100), "").unwrap();
        cache.get(&req(1, 10, 0));
        let n = cache.n_req();
        assert!(cache.find(&req(1, 10, 0), false).is_some());
        assert_eq!(cache.n_req(), n);
        assert!(cache.find(&req(9, 10, 0), false).is_none());
    }

    #[test]
    fn test_metadata_accounting() {
        let common = CommonParams::new(1000).with_obj_metadata(true);
        let mut cache = Cache::init("gdsf", common, "").unwrap();
        cache.get(&req(1, 100, 0));
        assert!(cache.occupied_bytes() > 100);
    }

    #[test]
    fn test_stats_registered_under_instance_name() {
        let mut cache = Cache::init("fifo", CommonParams::new(100), "").unwrap();
        cache.get(&req(1, 10, 0));
        let stats = crate::stats_registry::get(cache.name()).unwrap();
        assert_eq!(stats.n_req(), 1);
        let name = cache.name().to_string();
        drop(cache);
        assert!(crate::stats_registry::get(&name).is_none());
    }
}
