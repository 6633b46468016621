use std::collections::VecDeque;

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState};
use crate::params::{parse_kv, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

const POLICY_NAME: &str = "lru";

/// Least Recently Used eviction.
///
/// A hit moves the object to the most-recently-used end of the order
/// queue; eviction pops the least-recently-used head. Re-request promotion
/// is the behavior the plugin reference table and several test scenarios
/// compare against.
#[derive(Debug, Default)]
pub struct LruPolicy {
    queue: VecDeque<u64>,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// LRU takes no parameters; any key is rejected.
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

    fn move_to_end(&mut self, obj_id: u64) {
        if let Some(pos) = self.queue.iter().position(|&id| id == obj_id) {
            self.queue.remove(pos);
            self.queue.push_back(obj_id);
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo> {
        let info = core.store().get(req.obj_id).map(|o| o.info())?;
        if update {
            self.move_to_end(req.obj_id);
        }
        Some(info)
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
            .unwrap_or_else(|| panic!("lru: no eviction candidate while occupied_bytes > 0"));
        core.remove_base(victim, true)
            .unwrap_or_else(|| panic!("lru: victim {victim} not resident"));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cache, CommonParams};

    fn req(id: u64, time: u64) -> Request {
        Request::new(id, 1, time)
    }

    #[test]
    fn test_lru_promotion_on_hit() {
        let mut cache = Cache::init("lru", CommonParams::new(3), "").unwrap();
        cache.get(&req(1, 0));
        cache.get(&req(2, 1));
        cache.get(&req(3, 2));
        // 1 becomes most recently used, 2 is now the LRU victim
        assert!(cache.get(&req(1, 3)));
        cache.get(&req(4, 4));

        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_lru_reference_trace() {
        // A B C A D: one hit, final residency {C, A, D}
        let mut cache = Cache::init("lru", CommonParams::new(3), "").unwrap();
        let (a, b, c, d) = (1, 2, 3, 4);
        assert!(!cache.get(&req(a, 0)));
        assert!(!cache.get(&req(b, 1)));
        assert!(!cache.get(&req(c, 2)));
        assert!(cache.get(&req(a, 3)));
        assert!(!cache.get(&req(d, 4)));

        let mut resident = cache.resident_ids();
        resident.sort_unstable();
        assert_eq!(resident, vec![a, c, d]);
        assert_eq!(cache.stats().n_hit(), 1);
    }
}
