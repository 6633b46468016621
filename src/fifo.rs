use std::collections::VecDeque;

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState};
use crate::params::{parse_kv, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

const POLICY_NAME: &str = "fifo";

/// First In, First Out eviction.
///
/// Objects are evicted in admission order; hits do not change an object's
/// position. FIFO is the substrate of the composite policies and the
/// model-less fallback behavior of the learned policy, which is why it is
/// kept as a standalone primitive.
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CommonParams, Request};
///
/// let mut cache = Cache::init("fifo", CommonParams::new(2), "").unwrap();
/// cache.get(&Request::new(1, 1, 0));
/// cache.get(&Request::new(2, 1, 1));
/// cache.get(&Request::new(1, 1, 2)); // hit, position unchanged
/// cache.get(&Request::new(3, 1, 3)); // evicts 1 (oldest)
/// assert!(!cache.contains(1));
/// ```
#[derive(Debug, Default)]
pub struct FifoPolicy {
    queue: VecDeque<u64>,
}

impl FifoPolicy {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// FIFO takes no parameters; any key is rejected.
    pub fn from_params(_common: &CommonParams, params: &str) -> Result<Self, CacheError> {
        for (key, _) in parse_kv(POLICY_NAME, params)? {
            if key == "print" {
                print_and_exit(POLICY_NAME, "(none)");
            }
            return Err(CacheError::UnknownParam {
                policy: POLICY_NAME,
                key,
            });
        }
        Ok(Self::new())
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, _update: bool) -> Option<ObjectInfo> {
        core.store().get(req.obj_id).map(|o| o.info())
    }

    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo> {
        let info = core.admit_base(req, PolicyState::None);
        self.queue.push_back(req.obj_id);
        Some(info)
    }

    fn evict(&mut self, core: &mut CacheCore, _req: &Request) {
        let victim = self
            .queue
            .pop_front()
            .unwrap_or_else(|| panic!("fifo: no eviction candidate while occupied_bytes > 0"));
        core.remove_base(victim, true)
            .unwrap_or_else(|| panic!("fifo: victim {victim} not resident"));
    }

    fn to_evict(
        &mut self,
        _core: &mut CacheCore,
        _req: &Request,
    ) -> Result<Option<u64>, CacheError> {
        Ok(self.queue.front().copied())
    }

    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool {
        if core.remove_base(obj_id, false).is_none() {
            return false;
        }
        if let Some(pos) = self.queue.iter().position(|&id| id == obj_id) {
            self.queue.remove(pos);
        }
        true
    }

    fn obj_metadata_size(&self) -> u64 {
        8 // one queue slot
    }
}
