use thiserror::Error;

/// Errors surfaced by cache construction and the few fallible runtime
/// operations.
///
/// The taxonomy separates configuration mistakes (caught at `init` and
/// fatal for the caller), plugin loading failures, learner failures (which
/// the 3L policy additionally survives by degrading to its model-less
/// eviction path) and operations a policy does not support.
///
/// Invariant violations - a policy selecting a non-resident victim, or an
/// eviction loop running out of candidates while bytes remain accounted -
/// are not represented here: they indicate a bug and terminate the process
/// via `panic!` with a diagnostic message.
///
/// # Examples
///
/// ```
/// use cachesim::{Cache, CacheError, CommonParams};
///
/// let err = Cache::init("s3fifo", CommonParams::new(100), "no-such-knob=1")
///     .unwrap_err();
/// assert!(matches!(err, CacheError::UnknownParam { .. }));
/// ```
#[derive(Debug, Error)]
pub enum CacheError {
    /// A policy parameter string contained a key the policy does not know.
    #[error("invalid configuration for `{policy}`: unknown parameter `{key}`")]
    UnknownParam { policy: &'static str, key: String },

    /// A policy parameter had a malformed or out-of-range value.
    #[error("invalid configuration for `{policy}`: `{key}={value}`: {reason}")]
    InvalidParam {
        policy: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A required policy parameter was absent (e.g. the plugin path).
    #[error("missing required parameter `{key}` for `{policy}`")]
    MissingParam {
        policy: &'static str,
        key: &'static str,
    },

    /// The requested policy name is not registered.
    #[error("unknown eviction policy `{0}`")]
    UnknownPolicy(String),

    /// The plugin module failed to load or a hook symbol is missing.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// The boosted-tree learner failed to train or predict.
    #[error("learner error: {0}")]
    Learner(String),

    /// The operation is not implemented by this policy (e.g. `to_evict`
    /// on policies that cannot peek without side effects).
    #[error("`{1}` is not supported by the `{0}` policy")]
    NotSupported(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_param() {
        let err = CacheError::UnknownParam {
            policy: "gdsf",
            key: "bogus".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for `gdsf`: unknown parameter `bogus`"
        );
    }

    #[test]
    fn test_display_not_supported() {
        let err = CacheError::NotSupported("plugin", "to_evict");
        assert_eq!(
            err.to_string(),
            "`to_evict` is not supported by the `plugin` policy"
        );
    }
}
