use std::collections::{HashMap, VecDeque};

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState, S3Queue};
use crate::params::{check_ratio, parse_f64, parse_kv, parse_u64, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

const POLICY_NAME: &str = "s3fifo";

/// Saturation ceiling of the 2-bit reference counter.
const FREQ_MAX: u8 = 3;

const DEFAULT_SMALL_RATIO: f64 = 0.10;
const DEFAULT_GHOST_RATIO: f64 = 0.90;
const DEFAULT_PROMOTE_THRESHOLD: u8 = 2;

/// One FIFO sub-queue with byte accounting.
#[derive(Debug, Default)]
struct SubFifo {
    queue: VecDeque<u64>,
    occupied: u64,
    capacity: u64,
}

impl SubFifo {
    fn with_capacity(capacity: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            occupied: 0,
            capacity,
        }
    }

    fn push(&mut self, obj_id: u64, size: u64) {
        self.queue.push_back(obj_id);
        self.occupied += size;
    }

    fn pop(&mut self, size: u64) -> Option<u64> {
        let id = self.queue.pop_front()?;
        self.occupied -= size;
        Some(id)
    }

    fn remove(&mut self, obj_id: u64, size: u64) -> bool {
        if let Some(pos) = self.queue.iter().position(|&id| id == obj_id) {
            self.queue.remove(pos);
            self.occupied -= size;
            true
        } else {
            false
        }
    }
}

/// Ghost FIFO: recently evicted ids and their sizes, bounded in bytes.
/// Entries never count against the cache's `occupied_bytes`.
#[derive(Debug, Default)]
struct GhostFifo {
    queue: VecDeque<u64>,
    sizes: HashMap<u64, u64>,
    occupied: u64,
    capacity: u64,
}

impl GhostFifo {
    fn with_capacity(capacity: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            sizes: HashMap::new(),
            occupied: 0,
            capacity,
        }
    }

    fn contains(&self, obj_id: u64) -> bool {
        self.sizes.contains_key(&obj_id)
    }

    fn insert(&mut self, obj_id: u64, size: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.sizes.insert(obj_id, size).is_none() {
            self.queue.push_back(obj_id);
            self.occupied += size;
        }
        while self.occupied > self.capacity {
            // Evicting the oldest ghost; stale ids (already removed on a
            // ghost hit) are skipped.
            match self.queue.pop_front() {
                Some(old) => {
                    if let Some(old_size) = self.sizes.remove(&old) {
                        self.occupied -= old_size;
                    }
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, obj_id: u64) -> bool {
        match self.sizes.remove(&obj_id) {
            Some(size) => {
                self.occupied -= size;
                if let Some(pos) = self.queue.iter().position(|&id| id == obj_id) {
                    self.queue.remove(pos);
                }
                true
            }
            None => false,
        }
    }
}

/// S3-FIFO: a small probationary FIFO, a main FIFO with 2-bit reference
/// counters, and a ghost FIFO of recently evicted ids.
///
/// New objects enter the small queue; objects re-requested at least
/// `move-to-main-threshold` times before reaching the small queue's head
/// are promoted to main, the rest are evicted into the ghost. A miss whose
/// id is still in the ghost is admitted directly into main (the object
/// proved reuse beyond the small window). Main is scanned clock-style: a
/// head object with a non-zero counter is demoted one step and reinserted
/// at the tail instead of being evicted.
///
/// # Parameters
///
/// * `small-size-ratio` (alias `fifo-size-ratio`) - small-queue share of
///   capacity, default 0.10. A ratio of 0 degrades to a single FIFO with
///   ghost: everything is admitted into main.
/// * `ghost-size-ratio` - ghost byte budget as a share of capacity,
///   default 0.90.
/// * `move-to-main-threshold` - minimum reference count for promotion,
///   default 2.
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CommonParams, Request};
///
/// let mut cache = Cache::init(
///     "s3fifo",
///     CommonParams::new(100),
///     "small-size-ratio=0.2,move-to-main-threshold=1",
/// )
/// .unwrap();
/// cache.get(&Request::new(1, 10, 0));
/// assert_eq!(cache.occupied_bytes(), 10);
/// ```
#[derive(Debug)]
pub struct S3FifoPolicy {
    small: SubFifo,
    main: SubFifo,
    ghost: GhostFifo,
    promote_threshold: u8,
    /// Set while handling a request whose id was found in the ghost; the
    /// matching insert admits straight into main. Reset at the start of
    /// every updating lookup so the flag never leaks across requests.
    hit_on_ghost: Option<u64>,
    n_obj_admit_to_small: u64,
    n_obj_admit_to_main: u64,
    n_obj_move_to_main: u64,
    n_byte_admit_to_small: u64,
    n_byte_admit_to_main: u64,
    n_byte_move_to_main: u64,
}

impl S3FifoPolicy {
    pub fn new(common: &CommonParams) -> Self {
        Self::with_ratios(
            common,
            DEFAULT_SMALL_RATIO,
            DEFAULT_GHOST_RATIO,
            DEFAULT_PROMOTE_THRESHOLD,
        )
    }

    pub fn with_ratios(
        common: &CommonParams,
        small_ratio: f64,
        ghost_ratio: f64,
        promote_threshold: u8,
    ) -> Self {
        let capacity = common.capacity_bytes;
        let small_capacity = (capacity as f64 * small_ratio) as u64;
        Self {
            small: SubFifo::with_capacity(small_capacity),
            main: SubFifo::with_capacity(capacity - small_capacity),
            ghost: GhostFifo::with_capacity((capacity as f64 * ghost_ratio) as u64),
            promote_threshold,
            hit_on_ghost: None,
            n_obj_admit_to_small: 0,
            n_obj_admit_to_main: 0,
            n_obj_move_to_main: 0,
            n_byte_admit_to_small: 0,
            n_byte_admit_to_main: 0,
            n_byte_move_to_main: 0,
        }
    }

    pub fn from_params(common: &CommonParams, params: &str) -> Result<Self, CacheError> {
        let mut small_ratio = DEFAULT_SMALL_RATIO;
        let mut ghost_ratio = DEFAULT_GHOST_RATIO;
        let mut promote_threshold = DEFAULT_PROMOTE_THRESHOLD;
        for (key, value) in parse_kv(POLICY_NAME, params)? {
            match key.as_str() {
                "small-size-ratio" | "fifo-size-ratio" => {
                    small_ratio = check_ratio(
                        POLICY_NAME,
                        "small-size-ratio",
                        parse_f64(POLICY_NAME, "small-size-ratio", &value)?,
                    )?;
                }
                "ghost-size-ratio" => {
                    ghost_ratio = check_ratio(
                        POLICY_NAME,
                        "ghost-size-ratio",
                        parse_f64(POLICY_NAME, "ghost-size-ratio", &value)?,
                    )?;
                }
                "move-to-main-threshold" => {
                    promote_threshold =
                        parse_u64(POLICY_NAME, "move-to-main-threshold", &value)?.min(u8::MAX as u64)
                            as u8;
                }
                "print" => {
                    print_and_exit(
                        POLICY_NAME,
                        &format!(
                            "small-size-ratio={small_ratio}, ghost-size-ratio={ghost_ratio}, \
                             move-to-main-threshold={promote_threshold}"
                        ),
                    );
                }
                _ => return Err(CacheError::UnknownParam {
                    policy: POLICY_NAME,
                    key,
                }),
            }
        }
        Ok(Self::with_ratios(
            common,
            small_ratio,
            ghost_ratio,
            promote_threshold,
        ))
    }

    /// One real eviction out of the small queue. Objects over the
    /// promotion threshold move to main instead and the scan continues.
    fn evict_small(&mut self, core: &mut CacheCore) {
        loop {
            let head = match self.small.queue.front().copied() {
                Some(id) => id,
                None => return,
            };
            let (freq, size) = match core.store().get(head) {
                Some(obj) => match obj.policy_state {
                    PolicyState::S3Fifo { freq, .. } => (freq, obj.size),
                    _ => unreachable!("s3fifo object without s3fifo state"),
                },
                None => panic!("s3fifo: small-queue id {head} not resident"),
            };
            self.small.pop(size);
            if freq >= self.promote_threshold {
                // Promotion: reuse observed while on probation.
                self.main.push(head, size);
                if let Some(obj) = core.store_mut().get_mut(head) {
                    obj.policy_state = PolicyState::S3Fifo {
                        freq: 0,
                        queue: S3Queue::Main,
                    };
                }
                self.n_obj_move_to_main += 1;
                self.n_byte_move_to_main += size;
                continue;
            }
            self.ghost.insert(head, size);
            core.remove_base(head, true)
                .unwrap_or_else(|| panic!("s3fifo: victim {head} not resident"));
            return;
        }
    }

    /// One real eviction out of the main queue, demoting reused objects
    /// clock-style along the way.
    fn evict_main(&mut self, core: &mut CacheCore) {
        loop {
            let head = match self.main.queue.front().copied() {
                Some(id) => id,
                None => return,
            };
            let (freq, size) = match core.store().get(head) {
                Some(obj) => match obj.policy_state {
                    PolicyState::S3Fifo { freq, .. } => (freq, obj.size),
                    _ => unreachable!("s3fifo object without s3fifo state"),
                },
                None => panic!("s3fifo: main-queue id {head} not resident"),
            };
            self.main.pop(size);
            if freq >= 1 {
                self.main.push(head, size);
                if let Some(obj) = core.store_mut().get_mut(head) {
                    obj.policy_state = PolicyState::S3Fifo {
                        freq: freq.min(FREQ_MAX) - 1,
                        queue: S3Queue::Main,
                    };
                }
                continue;
            }
            core.remove_base(head, true)
                .unwrap_or_else(|| panic!("s3fifo: victim {head} not resident"));
            return;
        }
    }
}

impl ReplacementPolicy for S3FifoPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo> {
        if update {
            self.hit_on_ghost = None;
        }
        match core.store_mut().get_mut(req.obj_id) {
            Some(obj) => {
                let info = obj.info();
                if update {
                    if let PolicyState::S3Fifo { freq, queue } = obj.policy_state {
                        obj.policy_state = PolicyState::S3Fifo {
                            freq: (freq + 1).min(FREQ_MAX),
                            queue,
                        };
                    }
                }
                Some(info)
            }
            None => {
                if update && self.ghost.remove(req.obj_id) {
                    self.hit_on_ghost = Some(req.obj_id);
                }
                None
            }
        }
    }

    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo> {
        let size = core.weighted_size(req.size);
        // The updating lookup consumed the ghost entry already; a direct
        // driver insert consumes it here, keeping ghost and resident sets
        // disjoint either way.
        let ghost_promote =
            self.hit_on_ghost == Some(req.obj_id) || self.ghost.remove(req.obj_id);
        if ghost_promote {
            self.hit_on_ghost = None;
        }
        if ghost_promote || self.small.capacity == 0 {
            let info = core.admit_base(
                req,
                PolicyState::S3Fifo {
                    freq: 0,
                    queue: S3Queue::Main,
                },
            );
            self.main.push(req.obj_id, size);
            self.n_obj_admit_to_main += 1;
            self.n_byte_admit_to_main += size;
            return Some(info);
        }
        if size > self.small.capacity {
            return None;
        }
        let info = core.admit_base(
            req,
            PolicyState::S3Fifo {
                freq: 0,
                queue: S3Queue::Small,
            },
        );
        self.small.push(req.obj_id, size);
        self.n_obj_admit_to_small += 1;
        self.n_byte_admit_to_small += size;
        Some(info)
    }

    fn evict(&mut self, core: &mut CacheCore, _req: &Request) {
        if self.small.queue.is_empty() && self.main.queue.is_empty() {
            panic!("s3fifo: no eviction candidate while occupied_bytes > 0");
        }
        if self.main.occupied > self.main.capacity || self.small.queue.is_empty() {
            self.evict_main(core);
        } else {
            self.evict_small(core);
        }
    }

    fn to_evict(
        &mut self,
        _core: &mut CacheCore,
        _req: &Request,
    ) -> Result<Option<u64>, CacheError> {
        // Peeking would have to simulate promotions and clock demotions
        // without applying them.
        Err(CacheError::NotSupported(POLICY_NAME, "to_evict"))
    }

    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool {
        match core.remove_base(obj_id, false) {
            Some(obj) => {
                let removed = match obj.policy_state {
                    PolicyState::S3Fifo {
                        queue: S3Queue::Small,
                        ..
                    } => self.small.remove(obj_id, obj.size),
                    _ => self.main.remove(obj_id, obj.size),
                };
                debug_assert!(removed, "resident s3fifo object missing from its queue");
                true
            }
            None => false,
        }
    }

    fn can_insert(&self, core: &CacheCore, req: &Request) -> bool {
        let size = core.weighted_size(req.size);
        if req.size == 0 || size > core.capacity() {
            return false;
        }
        // Objects wider than the probationary queue can only enter through
        // a ghost hit or when the small queue is disabled.
        size <= self.small.capacity
            || self.small.capacity == 0
            || self.hit_on_ghost == Some(req.obj_id)
            || self.ghost.contains(req.obj_id)
    }

    fn obj_metadata_size(&self) -> u64 {
        1 // the 2-bit counter, byte-aligned
    }

    fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("n_obj_admit_to_small", self.n_obj_admit_to_small),
            ("n_obj_admit_to_main", self.n_obj_admit_to_main),
            ("n_obj_move_to_main", self.n_obj_move_to_main),
            ("n_byte_admit_to_small", self.n_byte_admit_to_small),
            ("n_byte_admit_to_main", self.n_byte_admit_to_main),
            ("n_byte_move_to_main", self.n_byte_move_to_main),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ghost_bounded_in_bytes() {
        let mut ghost = GhostFifo::with_capacity(10);
        ghost.insert(1, 4);
        ghost.insert(2, 4);
        ghost.insert(3, 4); // pushes total to 12, evicts id 1
        assert!(!ghost.contains(1));
        assert!(ghost.contains(2));
        assert!(ghost.contains(3));
        assert!(ghost.occupied <= 10);
    }

    #[test]
    fn test_ghost_remove() {
        let mut ghost = GhostFifo::with_capacity(10);
        ghost.insert(1, 4);
        assert!(ghost.remove(1));
        assert!(!ghost.remove(1));
        assert_eq!(ghost.occupied, 0);
    }

    #[test]
    fn test_zero_capacity_ghost_keeps_nothing() {
        let mut ghost = GhostFifo::with_capacity(0);
        ghost.insert(1, 4);
        assert!(!ghost.contains(1));
    }

    #[test]
    fn test_from_params_defaults_and_alias() {
        let common = CommonParams::new(100);
        let policy = S3FifoPolicy::from_params(&common, "").unwrap();
        assert_eq!(policy.small.capacity, 10);
        assert_eq!(policy.main.capacity, 90);
        assert_eq!(policy.ghost.capacity, 90);
        assert_eq!(policy.promote_threshold, 2);

        let policy = S3FifoPolicy::from_params(&common, "fifo-size-ratio=0.3").unwrap();
        assert_eq!(policy.small.capacity, 30);
    }

    #[test]
    fn test_from_params_rejects_unknown() {
        let err = S3FifoPolicy::from_params(&CommonParams::new(100), "window=3").unwrap_err();
        assert!(matches!(err, CacheError::UnknownParam { .. }));
    }

    #[test]
    fn test_from_params_rejects_bad_ratio() {
        let err =
            S3FifoPolicy::from_params(&CommonParams::new(100), "small-size-ratio=1.5").unwrap_err();
        assert!(matches!(err, CacheError::InvalidParam { .. }));
    }
}
