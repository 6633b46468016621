use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState};
use crate::params::{parse_bool, parse_kv, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

const POLICY_NAME: &str = "gdsf";

/// Scale factor applied to the inverse-size term so priorities of small
/// objects dominate rounding noise.
const PRIORITY_SCALE: f64 = 1e6;

/// Eviction-order key: priority first, then admission sequence (FIFO among
/// equal priorities), then id. Keeping the sequence in the key also makes
/// the floating-point order fully deterministic across runs.
#[derive(Clone, Copy, Debug)]
struct PriorityKey {
    priority: f64,
    seq: u64,
    obj_id: u64,
}

impl PartialEq for PriorityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityKey {}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.obj_id.cmp(&other.obj_id))
    }
}

/// Greedy-Dual-Size-Frequency eviction.
///
/// Every resident object carries a scalar priority
/// `pri_last_evict + freq * SCALE / size`; eviction pops the minimum and
/// raises the aging floor `pri_last_evict` to the evicted priority. Newly
/// admitted objects therefore always start above the last eviction sweep
/// and cannot be evicted "ahead" of survivors.
///
/// An optional admission check (`admission-check=true`, default off)
/// predicts the incoming object's priority and skips admission when the
/// object would itself sit at the eviction frontier. It is off by default
/// because it tends to hurt miss ratio on large-object workloads.
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CommonParams, Request};
///
/// let mut cache = Cache::init("gdsf", CommonParams::new(3), "").unwrap();
/// for (t, id) in [1u64, 2, 3, 1, 1].iter().enumerate() {
///     cache.get(&Request::new(*id, 1, t as u64));
/// }
/// cache.get(&Request::new(4, 1, 5)); // evicts 2, the oldest freq-1 object
/// assert!(cache.contains(1));
/// assert!(!cache.contains(2));
/// ```
#[derive(Debug, Default)]
pub struct GdsfPolicy {
    order: BTreeSet<PriorityKey>,
    keys: HashMap<u64, PriorityKey>,
    pri_last_evict: f64,
    admission_check: bool,
    n_admission_skips: Cell<u64>,
}

impl GdsfPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `admission-check` (default `false`); other keys are fatal.
    pub fn from_params(_common: &CommonParams, params: &str) -> Result<Self, CacheError> {
        let mut policy = Self::new();
        for (key, value) in parse_kv(POLICY_NAME, params)? {
            match key.as_str() {
                "admission-check" => {
                    policy.admission_check = parse_bool(POLICY_NAME, "admission-check", &value)?;
                }
                "print" => {
                    print_and_exit(
                        POLICY_NAME,
                        &format!("admission-check={}", policy.admission_check),
                    );
                }
                _ => return Err(CacheError::UnknownParam {
                    policy: POLICY_NAME,
                    key,
                }),
            }
        }
        Ok(policy)
    }

    /// The aging floor: the priority of the most recently evicted object.
    /// Non-decreasing across evictions by construction.
    pub fn pri_last_evict(&self) -> f64 {
        self.pri_last_evict
    }

    fn priority(&self, freq: u64, size: u64) -> f64 {
        if size == 0 {
            return f64::INFINITY;
        }
        self.pri_last_evict + freq as f64 * PRIORITY_SCALE / size as f64
    }

    fn reinsert(&mut self, obj_id: u64, key: PriorityKey) {
        if let Some(old) = self.keys.insert(obj_id, key) {
            self.order.remove(&old);
        }
        self.order.insert(key);
    }
}

impl ReplacementPolicy for GdsfPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo> {
        let now = core.now();
        let obj = core.store_mut().get_mut(req.obj_id)?;
        let info = obj.info();
        if update {
            let freq = match obj.policy_state {
                PolicyState::Gdsf { freq, .. } => freq.saturating_add(1),
                _ => 1,
            };
            let priority = self.priority(freq, obj.size);
            obj.policy_state = PolicyState::Gdsf {
                freq,
                seq: now,
                priority,
            };
            self.reinsert(
                req.obj_id,
                PriorityKey {
                    priority,
                    seq: now,
                    obj_id: req.obj_id,
                },
            );
        }
        Some(info)
    }

    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo> {
        let now = core.now();
        let size = core.weighted_size(req.size);
        let priority = self.priority(1, size);
        let info = core.admit_base(
            req,
            PolicyState::Gdsf {
                freq: 1,
                seq: now,
                priority,
            },
        );
        self.reinsert(
            req.obj_id,
            PriorityKey {
                priority,
                seq: now,
                obj_id: req.obj_id,
            },
        );
        Some(info)
    }

    fn evict(&mut self, core: &mut CacheCore, _req: &Request) {
        let key = self
            .order
            .pop_first()
            .unwrap_or_else(|| panic!("gdsf: no eviction candidate while occupied_bytes > 0"));
        self.keys.remove(&key.obj_id);
        self.pri_last_evict = key.priority;
        core.remove_base(key.obj_id, true)
            .unwrap_or_else(|| panic!("gdsf: victim {} not resident", key.obj_id));
    }

    fn to_evict(
        &mut self,
        _core: &mut CacheCore,
        _req: &Request,
    ) -> Result<Option<u64>, CacheError> {
        Ok(self.order.first().map(|k| k.obj_id))
    }

    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool {
        if core.remove_base(obj_id, false).is_none() {
            return false;
        }
        if let Some(key) = self.keys.remove(&obj_id) {
            self.order.remove(&key);
        }
        true
    }

    fn can_insert(&self, core: &CacheCore, req: &Request) -> bool {
        let size = core.weighted_size(req.size);
        if req.size == 0 || size > core.capacity() {
            return false;
        }
        if self.admission_check && core.occupied_bytes() + size > core.capacity() {
            let incoming = self.priority(1, size);
            if let Some(tail) = self.order.first() {
                if incoming < tail.priority {
                    self.n_admission_skips.set(self.n_admission_skips.get() + 1);
                    return false;
                }
            }
        }
        true
    }

    fn obj_metadata_size(&self) -> u64 {
        16 // priority-set key
    }

    fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("n_admission_skips", self.n_admission_skips.get()),
            // Scaled so the aging floor is visible through integer counters
            ("pri_last_evict_milli", (self.pri_last_evict * 1000.0) as u64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_key_ordering() {
        let a = PriorityKey {
            priority: 1.0,
            seq: 5,
            obj_id: 1,
        };
        let b = PriorityKey {
            priority: 1.0,
            seq: 6,
            obj_id: 2,
        };
        let c = PriorityKey {
            priority: 2.0,
            seq: 1,
            obj_id: 3,
        };
        assert!(a < b); // sequence breaks priority ties (FIFO)
        assert!(b < c);
    }

    #[test]
    fn test_priority_prefers_small_objects() {
        let policy = GdsfPolicy::new();
        assert!(policy.priority(1, 10) > policy.priority(1, 100));
        assert!(policy.priority(2, 100) > policy.priority(1, 100));
    }

    #[test]
    fn test_zero_size_priority_is_infinite() {
        let policy = GdsfPolicy::new();
        assert_eq!(policy.priority(1, 0), f64::INFINITY);
    }

    #[test]
    fn test_from_params_admission_check() {
        let common = CommonParams::new(100);
        let policy = GdsfPolicy::from_params(&common, "admission-check=true").unwrap();
        assert!(policy.admission_check);

        let err = GdsfPolicy::from_params(&common, "aging=2").unwrap_err();
        assert!(matches!(err, CacheError::UnknownParam { .. }));
    }
}
