use std::ffi::c_void;

use libloading::{Library, Symbol};
use tracing::debug;

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::obj_store::{ObjectInfo, PolicyState};
use crate::params::{parse_kv, print_and_exit, CommonParams};
use crate::policy::ReplacementPolicy;
use crate::request::Request;

const POLICY_NAME: &str = "plugin";

/// Version tag of the hook-table layout. Bump on any change to
/// [`PluginHooks`] or [`PluginRequest`]; tables carrying a different
/// version are rejected at init.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// C-compatible view of a request, passed to every hook.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PluginRequest {
    pub obj_id: u64,
    pub size: u64,
    pub time: u64,
}

impl From<&Request> for PluginRequest {
    fn from(req: &Request) -> Self {
        Self {
            obj_id: req.obj_id,
            size: req.size,
            time: req.time,
        }
    }
}

pub type PluginInitFn = extern "C" fn(capacity_bytes: u64, default_ttl: u64) -> *mut c_void;
pub type PluginHitFn = extern "C" fn(data: *mut c_void, req: PluginRequest);
pub type PluginMissFn = extern "C" fn(data: *mut c_void, req: PluginRequest);
pub type PluginEvictionFn = extern "C" fn(data: *mut c_void, req: PluginRequest) -> u64;
pub type PluginRemoveFn = extern "C" fn(data: *mut c_void, obj_id: u64);
pub type PluginFreeFn = extern "C" fn(data: *mut c_void);

/// The fixed, versioned hook table a plugin exports.
///
/// Dynamically loaded modules export the individual hooks under the symbol
/// names `cache_init_hook`, `cache_hit_hook`, `cache_miss_hook`,
/// `cache_eviction_hook`, `cache_remove_hook` and `cache_free_hook`;
/// statically linked policies hand a complete table to
/// [`PluginPolicy::from_hooks`].
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(Debug)]
pub struct PluginHooks {
    pub abi_version: u32,
    pub init: PluginInitFn,
    pub hit: PluginHitFn,
    pub miss: PluginMissFn,
    pub eviction: PluginEvictionFn,
    pub remove: PluginRemoveFn,
    pub free: PluginFreeFn,
}

/// A policy delegating its decisions to an external hook table.
///
/// Lookups and admissions go through the shared object store primitives;
/// the hooks observe hits and misses and, on [`evict`][ReplacementPolicy::evict],
/// return the victim's id. A victim that is not resident is a fatal
/// invariant violation.
///
/// The opaque `policy_data` pointer returned by the init hook is touched
/// only through the hooks; it is released by the free hook on drop, before
/// the module handle is closed.
///
/// # Examples
///
/// Loading from a module path through the generic driver interface:
///
/// ```no_run
/// use cachesim::{Cache, CommonParams};
///
/// let cache = Cache::init(
///     "plugin",
///     CommonParams::new(1 << 20),
///     "plugin_path=./libmy_policy.so,cache_name=my-policy",
/// )
/// .unwrap();
/// # drop(cache);
/// ```
#[derive(Debug)]
pub struct PluginPolicy {
    name: String,
    hooks: PluginHooks,
    data: *mut c_void,
    /// Keeps the loaded module alive for the lifetime of `data`; declared
    /// after it so the handle is dropped last.
    _library: Option<Library>,
}

impl PluginPolicy {
    /// Builds from `plugin_path` (required, non-empty) and optional
    /// `cache_name` parameters.
    pub fn from_params(common: &CommonParams, params: &str) -> Result<Self, CacheError> {
        let mut plugin_path: Option<String> = None;
        let mut cache_name: Option<String> = None;
        for (key, value) in parse_kv(POLICY_NAME, params)? {
            match key.as_str() {
                "plugin_path" => plugin_path = Some(value),
                "cache_name" => cache_name = Some(value),
                "print" => {
                    print_and_exit(POLICY_NAME, "plugin_path=<required>, cache_name=<optional>");
                }
                _ => return Err(CacheError::UnknownParam {
                    policy: POLICY_NAME,
                    key,
                }),
            }
        }
        let path = match plugin_path {
            Some(path) if !path.is_empty() => path,
            _ => {
                return Err(CacheError::MissingParam {
                    policy: POLICY_NAME,
                    key: "plugin_path",
                })
            }
        };
        Self::load(common, &path, cache_name)
    }

    /// Loads a module and resolves all hook symbols; any missing symbol is
    /// fatal.
    pub fn load(
        common: &CommonParams,
        path: &str,
        cache_name: Option<String>,
    ) -> Result<Self, CacheError> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| CacheError::Plugin(format!("failed to load `{path}`: {e}")))?;
        let hooks = unsafe {
            let init: Symbol<PluginInitFn> = resolve(&library, path, b"cache_init_hook")?;
            let hit: Symbol<PluginHitFn> = resolve(&library, path, b"cache_hit_hook")?;
            let miss: Symbol<PluginMissFn> = resolve(&library, path, b"cache_miss_hook")?;
            let eviction: Symbol<PluginEvictionFn> =
                resolve(&library, path, b"cache_eviction_hook")?;
            let remove: Symbol<PluginRemoveFn> = resolve(&library, path, b"cache_remove_hook")?;
            let free: Symbol<PluginFreeFn> = resolve(&library, path, b"cache_free_hook")?;
            PluginHooks {
                abi_version: PLUGIN_ABI_VERSION,
                init: *init,
                hit: *hit,
                miss: *miss,
                eviction: *eviction,
                remove: *remove,
                free: *free,
            }
        };
        debug!(path, "plugin module loaded");
        Ok(Self::attach(common, hooks, cache_name, Some(library)))
    }

    /// Wraps an in-process hook table (statically linked policies, tests).
    pub fn from_hooks(
        common: &CommonParams,
        hooks: PluginHooks,
        cache_name: Option<String>,
    ) -> Result<Self, CacheError> {
        if hooks.abi_version != PLUGIN_ABI_VERSION {
            return Err(CacheError::Plugin(format!(
                "hook table ABI version {} does not match {}",
                hooks.abi_version, PLUGIN_ABI_VERSION
            )));
        }
        Ok(Self::attach(common, hooks, cache_name, None))
    }

    fn attach(
        common: &CommonParams,
        hooks: PluginHooks,
        cache_name: Option<String>,
        library: Option<Library>,
    ) -> Self {
        let data = (hooks.init)(common.capacity_bytes, common.default_ttl.unwrap_or(0));
        Self {
            name: cache_name.unwrap_or_else(|| POLICY_NAME.to_string()),
            hooks,
            data,
            _library: library,
        }
    }
}

fn resolve<'lib, T>(
    library: &'lib Library,
    path: &str,
    symbol: &[u8],
) -> Result<Symbol<'lib, T>, CacheError> {
    unsafe {
        library.get(symbol).map_err(|e| {
            CacheError::Plugin(format!(
                "`{path}` does not export `{}`: {e}",
                String::from_utf8_lossy(symbol)
            ))
        })
    }
}

impl ReplacementPolicy for PluginPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&mut self, core: &mut CacheCore, req: &Request, update: bool) -> Option<ObjectInfo> {
        let info = core.store().get(req.obj_id).map(|o| o.info());
        if update {
            if info.is_some() {
                (self.hooks.hit)(self.data, req.into());
            } else {
                (self.hooks.miss)(self.data, req.into());
            }
        }
        info
    }

    fn insert(&mut self, core: &mut CacheCore, req: &Request) -> Option<ObjectInfo> {
        Some(core.admit_base(req, PolicyState::None))
    }

    fn evict(&mut self, core: &mut CacheCore, req: &Request) {
        let victim = (self.hooks.eviction)(self.data, req.into());
        core.remove_base(victim, true).unwrap_or_else(|| {
            panic!("plugin `{}` selected non-resident victim {victim}", self.name)
        });
    }

    fn to_evict(
        &mut self,
        _core: &mut CacheCore,
        _req: &Request,
    ) -> Result<Option<u64>, CacheError> {
        // A hook-based policy cannot be introspected without side effects.
        Err(CacheError::NotSupported(POLICY_NAME, "to_evict"))
    }

    fn remove(&mut self, core: &mut CacheCore, obj_id: u64) -> bool {
        if core.remove_base(obj_id, false).is_none() {
            return false;
        }
        (self.hooks.remove)(self.data, obj_id);
        true
    }
}

impl Drop for PluginPolicy {
    fn drop(&mut self) {
        (self.hooks.free)(self.data);
        // `_library` drops after this body: the module handle outlives
        // every use of `data`.
    }
}
