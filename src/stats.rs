use std::sync::atomic::{AtomicU64, Ordering};

/// Number of log2 buckets in the eviction-age histogram (ages are logical
/// request counts, so 64 bits of range plus the zero bucket).
const AGE_BUCKETS: usize = 65;

/// Cache statistics for monitoring hit/miss ratios, byte-miss ratios and
/// eviction behavior.
///
/// Counters use atomic operations with `Relaxed` ordering so a driver
/// thread can read metrics while another thread steps the cache, with
/// minimal overhead on the hot path. A single cache instance is itself
/// stepped by exactly one thread.
///
/// # Examples
///
/// ```
/// use cachesim::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_request(100, true);
/// stats.record_request(300, false);
///
/// assert_eq!(stats.n_req(), 2);
/// assert_eq!(stats.n_hit(), 1);
/// assert_eq!(stats.n_miss(), 1);
/// assert_eq!(stats.byte_req(), 400);
/// assert_eq!(stats.byte_miss(), 300);
/// assert!((stats.hit_ratio() - 0.5).abs() < 1e-9);
/// assert!((stats.byte_miss_ratio() - 0.75).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    n_req: AtomicU64,
    n_hit: AtomicU64,
    byte_req: AtomicU64,
    byte_miss: AtomicU64,
    n_insert: AtomicU64,
    n_eviction: AtomicU64,
    age_hist: [AtomicU64; AGE_BUCKETS],
}

impl CacheStats {
    /// Creates a new `CacheStats` instance with zero counters.
    pub fn new() -> Self {
        Self {
            n_req: AtomicU64::new(0),
            n_hit: AtomicU64::new(0),
            byte_req: AtomicU64::new(0),
            byte_miss: AtomicU64::new(0),
            n_insert: AtomicU64::new(0),
            n_eviction: AtomicU64::new(0),
            age_hist: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Records one completed request: the request itself, its byte volume
    /// and whether it was served from the cache.
    #[inline]
    pub fn record_request(&self, size: u64, hit: bool) {
        self.n_req.fetch_add(1, Ordering::Relaxed);
        self.byte_req.fetch_add(size, Ordering::Relaxed);
        if hit {
            self.n_hit.fetch_add(1, Ordering::Relaxed);
        } else {
            self.byte_miss.fetch_add(size, Ordering::Relaxed);
        }
    }

    /// Records an object admission.
    #[inline]
    pub fn record_insert(&self) {
        self.n_insert.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an eviction together with the evicted object's age in
    /// logical time (requests since admission). Ages land in log2 buckets.
    #[inline]
    pub fn record_eviction(&self, age: u64) {
        self.n_eviction.fetch_add(1, Ordering::Relaxed);
        self.age_hist[Self::age_bucket(age)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn age_bucket(age: u64) -> usize {
        (u64::BITS - age.leading_zeros()) as usize
    }

    /// Total number of requests seen.
    #[inline]
    pub fn n_req(&self) -> u64 {
        self.n_req.load(Ordering::Relaxed)
    }

    /// Number of requests served from the cache.
    #[inline]
    pub fn n_hit(&self) -> u64 {
        self.n_hit.load(Ordering::Relaxed)
    }

    /// Number of requests that missed.
    #[inline]
    pub fn n_miss(&self) -> u64 {
        self.n_req() - self.n_hit()
    }

    /// Total bytes requested.
    #[inline]
    pub fn byte_req(&self) -> u64 {
        self.byte_req.load(Ordering::Relaxed)
    }

    /// Total bytes that had to be fetched from the origin (missed bytes).
    #[inline]
    pub fn byte_miss(&self) -> u64 {
        self.byte_miss.load(Ordering::Relaxed)
    }

    /// Number of objects admitted.
    #[inline]
    pub fn n_insert(&self) -> u64 {
        self.n_insert.load(Ordering::Relaxed)
    }

    /// Number of objects evicted.
    #[inline]
    pub fn n_eviction(&self) -> u64 {
        self.n_eviction.load(Ordering::Relaxed)
    }

    /// Object hit ratio in `[0, 1]`. Returns 0.0 with no requests.
    #[inline]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.n_req();
        if total == 0 {
            0.0
        } else {
            self.n_hit() as f64 / total as f64
        }
    }

    /// Object miss ratio in `[0, 1]`.
    #[inline]
    pub fn miss_ratio(&self) -> f64 {
        1.0 - self.hit_ratio()
    }

    /// Byte miss ratio in `[0, 1]`. Returns 0.0 with no requested bytes.
    #[inline]
    pub fn byte_miss_ratio(&self) -> f64 {
        let total = self.byte_req();
        if total == 0 {
            0.0
        } else {
            self.byte_miss() as f64 / total as f64
        }
    }

    /// Snapshot of the eviction-age histogram. Bucket `b` counts evictions
    /// of objects whose age in requests fell in `[2^(b-1), 2^b)` (bucket 0
    /// is age zero).
    pub fn eviction_age_hist(&self) -> Vec<u64> {
        self.age_hist
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.n_req.store(0, Ordering::Relaxed);
        self.n_hit.store(0, Ordering::Relaxed);
        self.byte_req.store(0, Ordering::Relaxed);
        self.byte_miss.store(0, Ordering::Relaxed);
        self.n_insert.store(0, Ordering::Relaxed);
        self.n_eviction.store(0, Ordering::Relaxed);
        for b in &self.age_hist {
            b.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        let cloned = Self::new();
        cloned.n_req.store(self.n_req(), Ordering::Relaxed);
        cloned.n_hit.store(self.n_hit(), Ordering::Relaxed);
        cloned.byte_req.store(self.byte_req(), Ordering::Relaxed);
        cloned.byte_miss.store(self.byte_miss(), Ordering::Relaxed);
        cloned.n_insert.store(self.n_insert(), Ordering::Relaxed);
        cloned.n_eviction.store(self.n_eviction(), Ordering::Relaxed);
        for (dst, src) in cloned.age_hist.iter().zip(self.age_hist.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        cloned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.n_req(), 0);
        assert_eq!(stats.n_hit(), 0);
        assert_eq!(stats.byte_req(), 0);
        assert_eq!(stats.n_eviction(), 0);
    }

    #[test]
    fn test_record_request() {
        let stats = CacheStats::new();
        stats.record_request(10, true);
        stats.record_request(20, false);
        stats.record_request(30, false);

        assert_eq!(stats.n_req(), 3);
        assert_eq!(stats.n_hit(), 1);
        assert_eq!(stats.n_miss(), 2);
        assert_eq!(stats.byte_req(), 60);
        assert_eq!(stats.byte_miss(), 50);
    }

    #[test]
    fn test_ratios_no_accesses() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_ratio(), 0.0);
        assert_eq!(stats.miss_ratio(), 1.0);
        assert_eq!(stats.byte_miss_ratio(), 0.0);
    }

    #[test]
    fn test_eviction_age_buckets() {
        let stats = CacheStats::new();
        stats.record_eviction(0); // bucket 0
        stats.record_eviction(1); // bucket 1
        stats.record_eviction(2); // bucket 2
        stats.record_eviction(3); // bucket 2
        stats.record_eviction(4); // bucket 3

        let hist = stats.eviction_age_hist();
        assert_eq!(hist[0], 1);
        assert_eq!(hist[1], 1);
        assert_eq!(hist[2], 2);
        assert_eq!(hist[3], 1);
        assert_eq!(stats.n_eviction(), 5);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();
        stats.record_request(10, false);
        stats.record_insert();
        stats.record_eviction(5);

        stats.reset();
        assert_eq!(stats.n_req(), 0);
        assert_eq!(stats.n_insert(), 0);
        assert_eq!(stats.n_eviction(), 0);
        assert!(stats.eviction_age_hist().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clone_is_independent() {
        let stats = CacheStats::new();
        stats.record_request(1, true);

        let cloned = stats.clone();
        stats.record_request(1, true);

        assert_eq!(stats.n_hit(), 2);
        assert_eq!(cloned.n_hit(), 1);
    }
}
