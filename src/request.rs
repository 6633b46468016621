/// A single trace event presented to a cache.
///
/// A request is immutable within a `get` call: the cache never rewrites the
/// event, it only reads it to look up, admit or evict objects.
///
/// # Fields
///
/// * `obj_id` - Identity of the requested object
/// * `size` - Object size in bytes as reported by the trace
/// * `time` - Trace timestamp (seconds or any monotonic unit); only used for
///   TTL expiry. Priorities, reuse distances and eviction ages are computed
///   from the cache's own logical clock, not from this field.
///
/// # Examples
///
/// ```
/// use cachesim::Request;
///
/// let req = Request::new(42, 1024, 0);
/// assert_eq!(req.obj_id, 42);
/// assert_eq!(req.size, 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub obj_id: u64,
    pub size: u64,
    pub time: u64,
}

impl Request {
    /// Creates a new request event.
    pub fn new(obj_id: u64, size: u64, time: u64) -> Self {
        Self { obj_id, size, time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_fields() {
        let req = Request::new(7, 100, 3);
        assert_eq!(req.obj_id, 7);
        assert_eq!(req.size, 100);
        assert_eq!(req.time, 3);
    }

    #[test]
    fn test_request_is_copy() {
        let req = Request::new(1, 1, 0);
        let copy = req;
        assert_eq!(copy, req);
    }
}
