//! Client- and per-command policy knobs (SPEC_FULL §0, §10).
//!
//! Plain structs with `Default` impls, the same shape the Rust reference
//! client's `policy` module uses — there is no config-file format to parse
//! (the source C client reads none either); every value is set by
//! constructing/mutating these structs in code.

use std::time::Duration;

/// Read consistency level (spec §4.A info1 bit, GLOSSARY "sc_mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    One,
    All,
}

/// Write commit level (spec §4.A info3 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitLevel {
    All,
    Master,
}

/// How a write's expected generation is checked (spec §7, §8 scenario 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPolicy {
    None,
    ExpectGenEqual,
    ExpectGenGreater,
}

/// `info2`'s create/replace/update-only combination (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordExistsAction {
    Update,
    UpdateOnly,
    Replace,
    ReplaceOnly,
    CreateOnly,
}

/// Fields shared by every command: retry/backoff and timeout knobs named in
/// spec §5/§7 prose but not given concrete fields there (SPEC_FULL §10).
#[derive(Debug, Clone)]
pub struct BasePolicy {
    /// Absolute deadline for the whole call, including retries. `None`
    /// means no deadline (spec §5 "total_timeout").
    pub total_timeout: Option<Duration>,
    /// Per-I/O deadline; exceeding it closes the socket instead of pooling
    /// it (spec §5 "socket_timeout").
    pub socket_timeout: Duration,
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    pub consistency_level: ConsistencyLevel,
}

impl Default for BasePolicy {
    fn default() -> Self {
        Self {
            total_timeout: Some(Duration::from_secs(1)),
            socket_timeout: Duration::from_millis(30_000),
            max_retries: 2,
            sleep_between_retries: Duration::from_millis(0),
            consistency_level: ConsistencyLevel::One,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadPolicy {
    pub base: BasePolicy,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WritePolicy {
    pub base: BasePolicy,
    pub generation_policy: GenerationPolicy,
    pub generation: u32,
    pub record_exists_action: RecordExistsAction,
    pub commit_level: CommitLevel,
    pub expiration: u32,
    /// Retry a write on a transient network error; the default of `false`
    /// matches spec §4.G's "on generation-match failures, no retry" bias
    /// toward not replaying a write whose effect may have already landed.
    pub send_key: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy {
                max_retries: 0,
                ..BasePolicy::default()
            },
            generation_policy: GenerationPolicy::None,
            generation: 0,
            record_exists_action: RecordExistsAction::Update,
            commit_level: CommitLevel::All,
            expiration: 0,
            send_key: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub base: BasePolicy,
    /// How many node-grouped sub-requests run concurrently; `0` means
    /// unbounded (spec §4.G "emits one batch-read request per node in
    /// parallel").
    pub max_concurrent_threads: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy::default(),
            max_concurrent_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanConcurrency {
    Concurrent,
    Serial,
}

#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub base: BasePolicy,
    pub concurrency: ScanConcurrency,
    pub fail_on_cluster_change: bool,
    pub max_records: u64,
    pub records_per_second: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy::default(),
            concurrency: ScanConcurrency::Concurrent,
            fail_on_cluster_change: true,
            max_records: 0,
            records_per_second: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryPolicy {
    pub base: BasePolicy,
    pub concurrency: ScanConcurrency,
    pub fail_on_cluster_change: bool,
    pub record_queue_size: usize,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy::default(),
            concurrency: ScanConcurrency::Concurrent,
            fail_on_cluster_change: true,
            record_queue_size: 50,
        }
    }
}

/// Cluster-wide configuration (spec §4.E "Creation" — "takes nothing more
/// than configuration").
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    /// Synchronous per-node connection pool cap (spec §4.B: fixed at 300 in
    /// the source; exposed here rather than hardcoded).
    pub connection_pool_size_per_node: usize,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    /// How often the tender wakes for *this* cluster, as a multiple of the
    /// tender thread's base tick (spec §4.F: "whose own period divides the
    /// current tick count").
    pub tend_interval: Duration,
    pub fail_if_not_connected: bool,
    /// Whether `get_node`/seed discovery should keep expanding to peers
    /// reported by `services` (spec §4.F step 7) or stick to the
    /// originally registered seeds.
    pub follow_peers: bool,
    /// Prefer `services-alternate`/`peers-*-alt` over `services`/`peers-*`
    /// when asking a node for its peer list (SPEC_FULL §10).
    pub use_services_alternate: bool,
    pub health_retirement_threshold: u32,
    /// Per-socket bound on in-flight async commands before a connection
    /// actor starts rejecting new ones with `AsyncQueueFull` (spec §4.G
    /// "Async transport": "below a per-socket bound").
    pub async_pipeline_depth: usize,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            connection_pool_size_per_node: 300,
            connection_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(55),
            tend_interval: Duration::from_secs(1),
            fail_if_not_connected: true,
            follow_peers: true,
            use_services_alternate: false,
            health_retirement_threshold: 50,
            async_pipeline_depth: 16,
        }
    }
}
