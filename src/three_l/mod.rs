//! The learned eviction policy.
//!
//! Combines a uniform trace sampler, an LRU-like in-cache circular list
//! with out-of-cache shadow records, a per-object feature store and a
//! gradient-boosted regressor predicting `log1p` of the next reuse
//! interval. Eviction ranks a sampled candidate set by predicted reuse
//! time and removes the candidate expected to be reused furthest in the
//! future; without a trained model the policy degrades to evicting the
//! head of the circular list.

mod learner;
mod meta;

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState};
use crate::params::{parse_f64, parse_kv, parse_u64, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

use learner::{Learner, LearnerParams, TrainBuffer, N_FEATURE};
use meta::{ListKind, Location, Meta, MetaTables};

const POLICY_NAME: &str = "3l-cache";

/// Rows accumulated before a training round runs.
const TRAIN_BATCH_ROWS: usize = 65_536;
/// Sampled-hit labels are emitted with probability 1/4 once a model
/// exists; before the first model every sampled hit is labeled.
const LABEL_COIN: u32 = 4;
/// Log2 buckets of the eviction-frequency distribution (u16 frequencies).
const FREQ_BUCKETS: usize = 17;
/// Cumulative-distribution cutoff for the sampling boundary (percent).
const BOUNDARY_PERCENTILE: u64 = 99;
/// Minimum observed evictions before the boundary is trusted.
const BOUNDARY_MIN_EVICTIONS: u64 = 64;

const DEFAULT_NUM_ITERATIONS: usize = 16;
const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_NUM_LEAVES: u32 = 32;
const DEFAULT_SAMPLE_RATE: usize = 64;
const DEFAULT_RESERVED_SPACE: u64 = 10;

/// What the regressor's output optimizes for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
    /// Predicted reuse = `exp(score) + time-since-training`.
    ByteMissRatio,
    /// Predicted reuse = `size * exp(score)`.
    ObjectMissRatio,
}

/// Max-heap entry of `(predicted reuse time, key)`. Stale entries are left
/// in the heap and detected at pop time against `pred_map`.
#[derive(Clone, Copy, Debug)]
struct PredEntry {
    reuse: f64,
    key: u64,
}

impl PartialEq for PredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for PredEntry {}

impl PartialOrd for PredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PredEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.reuse
            .total_cmp(&other.reuse)
            .then_with(|| self.key.cmp(&other.key))
    }
}

fn ln1p(x: f64) -> f32 {
    x.ln_1p() as f32
}

/// Builds the feature row of a record as of sampling time `t_s`.
fn feature_row(meta: &Meta, t_s: u64) -> [f32; N_FEATURE] {
    let mut row = [0.0f32; N_FEATURE];
    row[0] = t_s.saturating_sub(meta.last_access) as f32;
    if let Some(ring) = &meta.extra {
        for (slot, distance) in ring.newest_first().enumerate() {
            row[1 + slot] = distance as f32;
        }
    }
    row[N_FEATURE - 2] = meta.size as f32;
    row[N_FEATURE - 1] = meta.freq as f32;
    row
}

fn freq_bucket(freq: u16) -> usize {
    (u16::BITS - freq.leading_zeros()) as usize
}

/// The 3L learned cache policy.
///
/// # Parameters
///
/// * `num_iterations` (16), `learning_rate` (0.1), `num_leaves` (32) -
///   boosted-ensemble shape
/// * `num_threads` - accepted for interface compatibility; the pure-Rust
///   learner is single-threaded
/// * `sample_rate` (64) - eviction candidates scored per round
/// * `byte_million_req` (0) - workload footprint hint scaling the shadow
///   history-span window into `[2, 6]`
/// * `objective` - `byte-miss-ratio` (default) or `object-miss-ratio`
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CommonParams, Request};
///
/// let mut cache = Cache::init(
///     "3l-cache",
///     CommonParams::new(100),
///     "objective=object-miss-ratio,sample_rate=32",
/// )
/// .unwrap();
/// for t in 0..200u64 {
///     cache.get(&Request::new(t % 20, 10, t));
/// }
/// assert!(cache.occupied_bytes() <= 100);
/// ```
#[derive(Debug)]
pub struct ThreeLCache {
    tables: MetaTables,
    objective: Objective,
    sample_rate: usize,
    /// History-span window: the shadow table holds up to
    /// `in_len * (hsw - 1) + 2` records.
    hsw: usize,
    learner_params: LearnerParams,
    num_threads: u64,

    buf: TrainBuffer,
    learner: Option<Learner>,
    /// Logical time of the last completed training round; part of the
    /// byte-miss-ratio reuse conversion.
    train_origin: u64,
    /// Worst-case eviction horizons: `[0]` is the previous training
    /// round's horizon (used for synthetic shadow labels), `[1]` tracks
    /// the current round.
    max_eviction_boundary: [f64; 2],

    pred_heap: BinaryHeap<PredEntry>,
    pred_map: HashMap<u64, f64>,

    /// Recently admitted keys (with accounted sizes) pending the
    /// quick-demotion check.
    new_keys: VecDeque<(u64, u64)>,
    new_obj_size: u64,

    /// Percent of capacity that freshly admitted bytes may occupy before
    /// quick demotion starts bypassing model scoring.
    reserved_space: u64,
    /// Head-of-list entries always included in the candidate set.
    sampling_lru: usize,
    /// Frequency cutoff for scan-sampled candidates.
    sample_boundary: u32,

    evict_freq_hist: [u64; FREQ_BUCKETS],
    sweep_evictions: u64,
    sweep_head_evictions: u64,
    sweep_quick_demotions: u64,

    n_train: u64,
    last_train_rows: u64,
    last_train_loss: f64,
    train_time_ms: u64,
}

impl ThreeLCache {
    pub fn new(common: &CommonParams) -> Self {
        Self::from_params(common, "").expect("default parameters are valid")
    }

    pub fn from_params(_common: &CommonParams, params: &str) -> Result<Self, CacheError> {
        let mut iterations = DEFAULT_NUM_ITERATIONS;
        let mut learning_rate = DEFAULT_LEARNING_RATE;
        let mut num_leaves = DEFAULT_NUM_LEAVES;
        let mut num_threads = 1u64;
        let mut byte_million_req = 0u64;
        let mut sample_rate = DEFAULT_SAMPLE_RATE;
        let mut objective = Objective::ByteMissRatio;

        for (key, value) in parse_kv(POLICY_NAME, params)? {
            match key.as_str() {
                "num_iterations" => {
                    iterations = parse_u64(POLICY_NAME, "num_iterations", &value)?.max(1) as usize;
                }
                "learning_rate" => {
                    learning_rate = parse_f64(POLICY_NAME, "learning_rate", &value)?;
                    if learning_rate <= 0.0 {
                        return Err(CacheError::InvalidParam {
                            policy: POLICY_NAME,
                            key: "learning_rate",
                            value,
                            reason: "must be positive".to_string(),
                        });
                    }
                }
                "num_threads" => {
                    num_threads = parse_u64(POLICY_NAME, "num_threads", &value)?;
                }
                "num_leaves" => {
                    num_leaves = parse_u64(POLICY_NAME, "num_leaves", &value)?.max(2) as u32;
                }
                "byte_million_req" => {
                    byte_million_req = parse_u64(POLICY_NAME, "byte_million_req", &value)?;
                }
                "sample_rate" => {
                    sample_rate = parse_u64(POLICY_NAME, "sample_rate", &value)?.max(1) as usize;
                }
                "objective" => {
                    objective = match value.as_str() {
                        "byte-miss-ratio" => Objective::ByteMissRatio,
                        "object-miss-ratio" => Objective::ObjectMissRatio,
                        _ => {
                            return Err(CacheError::InvalidParam {
                                policy: POLICY_NAME,
                                key: "objective",
                                value,
                                reason: "expected byte-miss-ratio or object-miss-ratio"
                                    .to_string(),
                            })
                        }
                    };
                }
                "print" => {
                    print_and_exit(
                        POLICY_NAME,
                        &format!(
                            "num_iterations={iterations}, learning_rate={learning_rate}, \
                             num_threads={num_threads}, num_leaves={num_leaves}, \
                             byte_million_req={byte_million_req}, sample_rate={sample_rate}, \
                             objective={objective:?}"
                        ),
                    );
                }
                _ => return Err(CacheError::UnknownParam {
                    policy: POLICY_NAME,
                    key,
                }),
            }
        }

        Ok(Self {
            tables: MetaTables::new(),
            objective,
            sample_rate,
            hsw: Self::history_span_window(byte_million_req),
            learner_params: LearnerParams {
                iterations,
                learning_rate,
                num_leaves,
            },
            num_threads,
            buf: TrainBuffer::new(),
            learner: None,
            train_origin: 0,
            max_eviction_boundary: [0.0; 2],
            pred_heap: BinaryHeap::new(),
            pred_map: HashMap::new(),
            new_keys: VecDeque::new(),
            new_obj_size: 0,
            reserved_space: DEFAULT_RESERVED_SPACE,
            sampling_lru: 1,
            sample_boundary: u32::MAX,
            evict_freq_hist: [0; FREQ_BUCKETS],
            sweep_evictions: 0,
            sweep_head_evictions: 0,
            sweep_quick_demotions: 0,
            n_train: 0,
            last_train_rows: 0,
            last_train_loss: 0.0,
            train_time_ms: 0,
        })
    }

    /// Maps the workload footprint hint (bytes per million requests) to a
    /// history-span window in `[2, 6]`. The window only bounds the shadow
    /// table, so the mapping is deliberately coarse.
    fn history_span_window(byte_million_req: u64) -> usize {
        match byte_million_req {
            0..=0x0FFF_FFFF => 2,          // < 256 MiB
            0x1000_0000..=0x3FFF_FFFF => 3, // < 1 GiB
            0x4000_0000..=0xFFFF_FFFF => 4, // < 4 GiB
            0x1_0000_0000..=0x3_FFFF_FFFF => 5,
            _ => 6,
        }
    }

    /// Both eviction horizons: the previous training round's worst case
    /// (used for synthetic shadow labels) and the currently tracked one.
    pub fn eviction_boundaries(&self) -> (f64, f64) {
        (self.max_eviction_boundary[0], self.max_eviction_boundary[1])
    }

    /// Runs a training round if enough rows are buffered. Only called
    /// between requests, never while an eviction batch is being ranked.
    fn maybe_train(&mut self, now: u64) {
        if self.buf.len() < TRAIN_BATCH_ROWS {
            return;
        }
        let started = Instant::now();
        let rows = self.buf.len();
        // Free the previous ensemble before growing a new one.
        self.learner = None;
        match Learner::train(&self.learner_params, &self.buf) {
            Ok((model, loss)) => {
                self.learner = Some(model);
                self.last_train_loss = loss;
                self.n_train += 1;
                debug!(
                    rows,
                    loss,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "trained reuse-distance model"
                );
            }
            Err(e) => {
                warn!(error = %e, "training failed, continuing without a model");
            }
        }
        self.last_train_rows = rows as u64;
        self.train_time_ms += started.elapsed().as_millis() as u64;
        self.buf.clear();
        self.pred_map.clear();
        self.pred_heap.clear();
        self.max_eviction_boundary[0] = self.max_eviction_boundary[1];
        self.train_origin = now;
    }

    /// Uniformly samples one record across both tables and stamps it if it
    /// is not already carrying a sample mark.
    fn sample_one(&mut self, now: u64) {
        let total = self.tables.total_len();
        if total == 0 {
            return;
        }
        let meta = self.tables.nth_meta_mut(fastrand::usize(..total));
        if meta.sample_time == 0 {
            meta.sample_time = now;
        }
    }

    /// Hit processing: label emission (features as of sample time, before
    /// this access mutates them), ring/frequency update, re-request
    /// promotion.
    fn on_hit(&mut self, pos: usize, now: u64) {
        let emit = {
            let meta = self.tables.in_meta(pos);
            meta.sample_time != 0
                && (self.learner.is_none() || fastrand::u32(..LABEL_COIN) == 0)
        };
        if emit {
            let meta = self.tables.in_meta(pos);
            let row = feature_row(meta, meta.sample_time);
            let future = now - meta.sample_time;
            self.buf.push_row(&row, ln1p(future as f64));
            self.tables.in_meta_mut(pos).sample_time = 0;
        }
        self.tables.in_meta_mut(pos).record_access(now);
        self.tables.touch(pos);
    }

    /// Quick demotion: while freshly admitted bytes exceed the reserved
    /// share of capacity, cold new objects are evicted straight from the
    /// admission queue, bypassing model scoring.
    fn quick_demote(&mut self, core: &mut CacheCore, now: u64) -> bool {
        let threshold = core.capacity().saturating_mul(self.reserved_space) / 100;
        while self.new_obj_size > threshold {
            let (key, size) = match self.new_keys.pop_front() {
                Some(entry) => entry,
                None => {
                    self.new_obj_size = 0;
                    break;
                }
            };
            self.new_obj_size = self.new_obj_size.saturating_sub(size);
            if let Some(Location {
                list: ListKind::InCache,
                pos,
            }) = self.tables.location(key)
            {
                // Re-accessed objects have proven reuse; leave them to the
                // scored path.
                if self.tables.in_meta(pos).freq <= 1 {
                    self.sweep_quick_demotions += 1;
                    self.demote_to_ghost(core, pos, now);
                    return true;
                }
            }
        }
        false
    }

    /// Candidate collection and model ranking; returns the in-cache
    /// position of the victim.
    fn select_victim(&mut self, now: u64) -> usize {
        let head = self.tables.head().expect("eviction with empty table");
        if self.learner.is_none() {
            return head;
        }

        let in_len = self.tables.in_len();
        let mut candidates: Vec<usize> = Vec::with_capacity(self.sample_rate.min(in_len));

        // The head region is always eligible.
        let mut idx = head;
        for _ in 0..self.sampling_lru.min(in_len) {
            candidates.push(idx);
            idx = self.tables.next_of(idx);
        }

        // Scan-sampled candidates below the frequency boundary.
        let mut steps = 0;
        while candidates.len() < self.sample_rate && steps < in_len {
            let cur = match self.tables.scan_current() {
                Some(cur) => cur,
                None => break,
            };
            let wrapped = self.tables.scan_advance();
            if (self.tables.in_meta(cur).freq.saturating_sub(1) as u32) < self.sample_boundary {
                candidates.push(cur);
            }
            if wrapped {
                self.retune();
            }
            steps += 1;
        }
        candidates.sort_unstable();
        candidates.dedup();
        if candidates.is_empty() {
            return head;
        }

        let rows: Vec<[f32; N_FEATURE]> = candidates
            .iter()
            .map(|&i| feature_row(self.tables.in_meta(i), now))
            .collect();
        let learner = self.learner.as_ref().expect("checked above");
        let scores = learner.predict(&rows);
        if scores.len() != candidates.len() {
            warn!("prediction batch size mismatch, falling back to list head");
            return head;
        }

        for (&pos, &score) in candidates.iter().zip(scores.iter()) {
            let meta = self.tables.in_meta(pos);
            let reuse = match self.objective {
                Objective::ByteMissRatio => {
                    (score as f64).exp() + (now - self.train_origin) as f64
                }
                Objective::ObjectMissRatio => meta.size as f64 * (score as f64).exp(),
            };
            self.pred_heap.push(PredEntry {
                reuse,
                key: meta.key,
            });
            self.pred_map.insert(meta.key, reuse);
        }

        // Pop the largest predicted reuse, discarding entries invalidated
        // by later predictions or by the object leaving the cache.
        while let Some(entry) = self.pred_heap.pop() {
            match self.pred_map.get(&entry.key) {
                Some(&reuse) if reuse == entry.reuse => {}
                _ => continue,
            }
            if let Some(Location {
                list: ListKind::InCache,
                pos,
            }) = self.tables.location(entry.key)
            {
                return pos;
            }
            self.pred_map.remove(&entry.key);
        }
        head
    }

    /// Moves the victim into the shadow table, releasing its bytes and
    /// trimming the shadow FIFO to its window.
    fn demote_to_ghost(&mut self, core: &mut CacheCore, pos: usize, now: u64) {
        {
            let meta = self.tables.in_meta(pos);
            self.evict_freq_hist[freq_bucket(meta.freq)] += 1;
            self.sweep_evictions += 1;
            let age = now.saturating_sub(meta.last_access) as f64;
            if age > self.max_eviction_boundary[1] {
                self.max_eviction_boundary[1] = age;
            }
        }
        if Some(pos) == self.tables.head() {
            self.sweep_head_evictions += 1;
        }

        let meta = self.tables.swap_remove_in(pos);
        let key = meta.key;
        self.pred_map.remove(&key);
        core.remove_base(key, true)
            .unwrap_or_else(|| panic!("3l-cache: victim {key} not resident"));
        self.tables.push_out(meta);
        self.trim_out_cache(now);
    }

    /// Bounds the shadow table to `in_len * (hsw - 1) + 2` records; popped
    /// records that still carry a sample mark emit a synthetic training
    /// row built from the prior-round eviction horizon.
    fn trim_out_cache(&mut self, now: u64) {
        let max_out = self.tables.in_len() * (self.hsw - 1) + 2;
        while self.tables.out_len() > max_out {
            let (meta, live) = match self.tables.pop_out() {
                Some(popped) => popped,
                None => break,
            };
            if live && meta.sample_time != 0 {
                let future =
                    self.max_eviction_boundary[0] + now.saturating_sub(meta.last_access) as f64;
                let row = feature_row(&meta, meta.sample_time);
                self.buf.push_row(&row, ln1p(future));
            }
        }
    }

    /// Knob adjustment on each full sweep of the in-cache list.
    fn retune(&mut self) {
        let total: u64 = self.evict_freq_hist.iter().sum();
        if total >= BOUNDARY_MIN_EVICTIONS {
            let cutoff = total * BOUNDARY_PERCENTILE / 100;
            let mut cumulative = 0u64;
            let mut boundary = u32::MAX;
            for (bucket, &count) in self.evict_freq_hist.iter().enumerate() {
                cumulative += count;
                if cumulative >= cutoff {
                    boundary = 1u32 << bucket;
                    break;
                }
            }
            self.sample_boundary = boundary;
            // Halve the history so the distribution tracks the workload.
            for count in &mut self.evict_freq_hist {
                *count /= 2;
            }
        }

        if self.sweep_evictions > 0 {
            if self.sweep_head_evictions * 2 >= self.sweep_evictions {
                self.sampling_lru = (self.sampling_lru + 1).min(self.sample_rate);
            } else if self.sampling_lru > 1 {
                self.sampling_lru -= 1;
            }
        }

        if self.sweep_quick_demotions > self.sample_rate as u64 {
            self.reserved_space = (self.reserved_space * 2).min(50);
        } else if self.reserved_space > 1 {
            self.reserved_space /= 2;
        }

        self.sweep_evictions = 0;
        self.sweep_head_evictions = 0;
        self.sweep_quick_demotions = 0;
    }
}

impl ReplacementPolicy for ThreeLCache {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo> {
        let now = core.now();
        if update {
            self.maybe_train(now);
        }
        let result = match self.tables.location(req.obj_id) {
            Some(Location {
                list: ListKind::InCache,
                pos,
            }) => {
                let info = core
                    .store()
                    .get(req.obj_id)
                    .map(|o| o.info())
                    .unwrap_or_else(|| panic!("3l-cache: indexed object {} not resident", req.obj_id));
                if update {
                    self.on_hit(pos, now);
                }
                Some(info)
            }
            // Shadow records are not resident: a lookup through one is a
            // miss, and the admission path performs the promotion.
            _ => None,
        };
        if update {
            self.sample_one(now);
        }
        result
    }

    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo> {
        let now = core.now();
        let size = core.weighted_size(req.size);
        let meta = match self.tables.clone_out(req.obj_id) {
            Some(mut shadow) => {
                // Ghost re-admission keeps the accumulated feature history.
                shadow.size = size;
                shadow.record_access(now);
                shadow
            }
            None => Meta::new(req.obj_id, size, now),
        };
        let info = core.admit_base(req, PolicyState::None);
        self.tables.push_in(meta);
        self.new_keys.push_back((req.obj_id, size));
        self.new_obj_size += size;
        Some(info)
    }

    fn evict(&mut self, core: &mut CacheCore, _req: &Request) {
        if self.tables.in_len() == 0 {
            panic!("3l-cache: no eviction candidate while occupied_bytes > 0");
        }
        let now = core.now();
        if self.quick_demote(core, now) {
            return;
        }
        let victim = self.select_victim(now);
        self.demote_to_ghost(core, victim, now);
    }

    fn to_evict(
        &mut self,
        _core: &mut CacheCore,
        _req: &Request,
    ) -> Result<Option<u64>, CacheError> {
        // Candidate sampling advances the scan pointer and feeds the
        // prediction heap; there is no side-effect-free peek.
        Err(CacheError::NotSupported(POLICY_NAME, "to_evict"))
    }

    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool {
        match self.tables.location(obj_id) {
            Some(Location {
                list: ListKind::InCache,
                pos,
            }) => {
                self.tables.swap_remove_in(pos);
                self.pred_map.remove(&obj_id);
                core.remove_base(obj_id, false)
                    .unwrap_or_else(|| panic!("3l-cache: indexed object {obj_id} not resident"));
                true
            }
            _ => false,
        }
    }

    fn obj_metadata_size(&self) -> u64 {
        48 // dense table row
    }

    fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("n_train", self.n_train),
            ("last_train_rows", self.last_train_rows),
            ("last_train_loss_milli", (self.last_train_loss * 1000.0) as u64),
            ("train_time_ms", self.train_time_ms),
            ("pending_train_rows", self.buf.len() as u64),
            ("n_shadow_records", self.tables.out_len() as u64),
            (
                "max_eviction_boundary_prev",
                self.max_eviction_boundary[0] as u64,
            ),
            (
                "max_eviction_boundary_cur",
                self.max_eviction_boundary[1] as u64,
            ),
            ("reserved_space", self.reserved_space),
            ("sampling_lru", self.sampling_lru as u64),
            ("sample_boundary", self.sample_boundary as u64),
            ("num_threads", self.num_threads),
        ]
    }
}
