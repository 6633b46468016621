use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::fifo::FifoPolicy;
use crate::gdsf::GdsfPolicy;
use crate::lru::LruPolicy;
use crate::obj_store::ObjectInfo;
use crate::params::CommonParams;
use crate::plugin::PluginPolicy;
use crate::request::Request;
use crate::s3fifo::S3FifoPolicy;
use crate::three_l::ThreeLCache;

/// The contract every eviction policy implements.
///
/// A policy owns its ordering structures (queues, priority sets, dense
/// tables, ghost lists) and mutates shared bookkeeping only through the
/// [`CacheCore`] primitives (`admit_base` / `remove_base`), which keep the
/// object store and `occupied_bytes` consistent. The core and the policy
/// are sibling fields of [`crate::Cache`], so a policy method can freely
/// take `&mut CacheCore` without aliasing itself.
///
/// Construction is policy-specific (each policy exposes a
/// `from_params(&CommonParams, &str)` constructor); teardown is `Drop`.
///
/// # Contract
///
/// * [`find`](Self::find) with `update = true` refreshes per-hit metadata
///   (recency, frequency, rings). With `update = false` it is a pure peek.
/// * [`insert`](Self::insert) admits a missed object. It may reject an
///   object (returning `None`) without touching any state; the caller has
///   already checked [`can_insert`](Self::can_insert) on the `get` path.
/// * [`evict`](Self::evict) makes progress towards at least one object
///   becoming non-resident. Failing to find any candidate while bytes are
///   still accounted is an invariant violation and must panic.
/// * [`remove`](Self::remove) is the explicit driver-initiated removal;
///   it returns `false` when the id is not resident.
/// * [`to_evict`](Self::to_evict) peeks the next victim without side
///   effects; policies that cannot do so return
///   [`CacheError::NotSupported`].
pub trait ReplacementPolicy: std::fmt::Debug {
    /// Short policy name used for registry entries and diagnostics.
    fn name(&self) -> &str;

    /// Looks up a request, optionally updating per-hit policy metadata.
    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo>;

    /// Admits a missed object, charging its bytes through the core.
    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo>;

    /// Selects a victim (or promotes/demotes and retries internally) and
    /// removes it through `remove_base`.
    fn evict(&mut self, core: &mut CacheCore, req: &Request);

    /// Peeks the next eviction victim without removing it.
    fn to_evict(&mut self, core: &mut CacheCore, req: &Request)
        -> Result<Option<u64>, CacheError>;

    /// Explicitly removes an object. Returns `true` if it was resident.
    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool;

    /// Whether the object could ever be admitted. The default accepts any
    /// non-empty object that fits the total capacity.
    fn can_insert(&self, core: &CacheCore, req: &Request) -> bool {
        req.size > 0 && core.weighted_size(req.size) <= core.capacity()
    }

    /// Per-object bookkeeping overhead in bytes, charged when
    /// `consider_obj_metadata` is enabled.
    fn obj_metadata_size(&self) -> u64 {
        0
    }

    /// Policy-specific instrumentation counters as `(name, value)` pairs.
    fn counters(&self) -> Vec<(&'static str, u64)> {
        Vec::new()
    }
}

/// Builds a policy from its registered name and a `key=value` parameter
/// string. Unknown policy names and unknown parameter keys are fatal.
pub(crate) fn build(
    name: &str,
    common: &CommonParams,
    params: &str,
) -> Result<Box<dyn ReplacementPolicy>, CacheError> {
    match name.to_lowercase().as_str() {
        "fifo" => Ok(Box::new(FifoPolicy::from_params(common, params)?)),
        "lru" => Ok(Box::new(LruPolicy::from_params(common, params)?)),
        "gdsf" => Ok(Box::new(GdsfPolicy::from_params(common, params)?)),
        "s3fifo" | "s3-fifo" => Ok(Box::new(S3FifoPolicy::from_params(common, params)?)),
        "3l-cache" | "3lcache" | "three-l-cache" => {
            Ok(Box::new(ThreeLCache::from_params(common, params)?))
        }
        "plugin" => Ok(Box::new(PluginPolicy::from_params(common, params)?)),
        _ => Err(CacheError::UnknownPolicy(name.to_string())),
    }
}
