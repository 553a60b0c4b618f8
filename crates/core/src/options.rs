//! Engine configuration.
//!
//! Options are fixed at engine construction time and shared read-only by
//! all sessions. Defaults are chosen for an embedded deployment; a server
//! front end typically raises `parallel` and `workers`.

/// Engine configuration with frozen defaults.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of concurrently granted lock holders (default: 8).
    ///
    /// Requests beyond this limit queue FIFO even if their lock sets would
    /// otherwise be compatible.
    pub parallel: usize,

    /// Number of worker threads executing asynchronous jobs (default: 2).
    pub workers: usize,

    /// Capacity of the pending asynchronous job queue (default: 1024).
    pub queue_capacity: usize,

    /// Maximum node payload size in bytes (default: 16MB).
    pub max_payload_bytes: usize,

    /// Fold resource names to lowercase (default: false, case-sensitive).
    pub case_insensitive_names: bool,

    /// How long an uncollected async result stays relevant, in seconds
    /// (default: 3600). Eviction itself is explicit: results are removed
    /// when collected or when the job is stopped; front ends may sweep by
    /// this timeout.
    pub cache_timeout_secs: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallel: 8,
            workers: 2,
            queue_capacity: 1024,
            max_payload_bytes: 16 * 1024 * 1024, // 16MB
            case_insensitive_names: false,
            cache_timeout_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.parallel, 8);
        assert_eq!(opts.workers, 2);
        assert_eq!(opts.queue_capacity, 1024);
        assert_eq!(opts.max_payload_bytes, 16 * 1024 * 1024);
        assert!(!opts.case_insensitive_names);
    }
}
