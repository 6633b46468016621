//! # Cachesim
//!
//! A trace-driven cache simulation engine. A [`Cache`] consumes a stream of
//! [`Request`] events and reports, per object, whether it was a hit or a
//! miss, while keeping byte-accurate occupancy under a configurable
//! capacity and a pluggable replacement policy.
//!
//! ## Features
//!
//! - **Uniform policy contract**: every policy implements
//!   [`ReplacementPolicy`] over the shared object store and occupancy
//!   accounting
//! - **Simple primitives**: FIFO and LRU
//! - **GDSF**: size- and frequency-aware priorities with an aging floor
//! - **S3-FIFO**: small/main/ghost composite with 2-bit reference counters
//! - **3L-Cache**: a learned policy ranking eviction candidates by a
//!   gradient-boosted prediction of the next reuse interval
//! - **Plugin policies**: a stable, versioned C-compatible hook table,
//!   loadable at runtime from a shared module
//! - **Instrumentation**: hit/miss and byte-miss ratios, eviction-age
//!   histograms, per-policy counters, and a process-global
//!   [`stats_registry`] for side-by-side comparisons
//!
//! ## Module Organization
//!
//! - [`request`] - the immutable trace event
//! - [`obj_store`] - the hash-indexed store of resident objects
//! - [`cache`] - shared bookkeeping and the top-level `get` flow
//! - [`policy`] - the policy contract and name-based construction
//! - [`fifo`], [`lru`], [`gdsf`], [`s3fifo`], [`three_l`], [`plugin`] -
//!   the policies
//! - [`stats`], [`stats_registry`] - instrumentation
//!
//! ## Example
//!
//! ```
//! use cachesim::{Cache, CommonParams, Request};
//!
//! let mut cache = Cache::init(
//!     "s3fifo",
//!     CommonParams::new(1000),
//!     "small-size-ratio=0.1,ghost-size-ratio=0.9",
//! )
//! .unwrap();
//!
//! for t in 0..10_000u64 {
//!     let req = Request::new(t % 300, 10, t);
//!     cache.get(&req);
//! }
//!
//! let stats = cache.stats();
//! assert_eq!(stats.n_req(), 10_000);
//! assert!(cache.occupied_bytes() <= cache.capacity());
//! ```

mod cache;
mod error;
mod fifo;
mod gdsf;
mod lru;
mod obj_store;
mod params;
mod plugin;
mod policy;
mod request;
mod s3fifo;
mod stats;
mod three_l;

pub mod stats_registry;

pub use cache::{Cache, CacheCore};
pub use error::CacheError;
pub use fifo::FifoPolicy;
pub use gdsf::GdsfPolicy;
pub use lru::LruPolicy;
pub use obj_store::{CacheObject, ObjectInfo, ObjectStore, PolicyState, S3Queue};
pub use params::CommonParams;
pub use plugin::{
    PluginEvictionFn, PluginFreeFn, PluginHitFn, PluginHooks, PluginInitFn, PluginMissFn,
    PluginPolicy, PluginRemoveFn, PluginRequest, PLUGIN_ABI_VERSION,
};
pub use policy::ReplacementPolicy;
pub use request::Request;
pub use s3fifo::S3FifoPolicy;
pub use stats::CacheStats;
pub use three_l::{Objective, ThreeLCache};
