//! Ambient configuration knobs consumed by the gateway.

use std::time::Duration;

/// Options that shape how the gateway acquires and caches repodata across
/// every channel it queries. Constructed by the (out-of-scope) CLI/config
/// loader and handed to [`crate::GatewayBuilder`]; the core never reads
/// environment variables itself — the two `CONDA_OVERRIDE_*` variables
/// belong to the external virtual-package collaborator and are not read by
/// this crate at all.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Skip all non-`file://` fetches; use the cache unconditionally if
    /// present, otherwise return empty indexes rather than failing.
    pub offline: bool,

    /// Always serve from the on-disk cache without revalidation, as long as
    /// it exists.
    pub use_index_cache: bool,

    /// `None`: use the upstream `Cache-Control: max-age`. `Some(0)`: the
    /// cache is always considered stale. `Some(n)` for `n > 1`: a fixed TTL
    /// of `n` seconds, overriding whatever the server advertises.
    pub local_repodata_ttl: Option<u64>,

    /// Exclude `packages.conda` entirely, keeping only `.tar.bz2` entries.
    pub use_only_tar_bz2: bool,

    /// Append `"pip"` to the dependencies of `python` 2.x/3.x records.
    pub add_pip_as_python_dependency: bool,

    /// Upper bound on concurrently in-flight subdirectory loads for a
    /// single [`crate::Gateway::query_all`] call. `1` (or fewer) forces a
    /// single-threaded executor with deterministic result ordering.
    pub repodata_threads: usize,

    /// Disables the JLAP incremental-patch path entirely, regardless of
    /// what a channel's [`crate::SourceConfig`] requests.
    pub jlap_enabled: bool,

    /// Connect timeout for outgoing HTTP requests.
    pub remote_connect_timeout: Duration,

    /// Read timeout for outgoing HTTP requests.
    pub remote_read_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            offline: false,
            use_index_cache: false,
            local_repodata_ttl: None,
            use_only_tar_bz2: false,
            add_pip_as_python_dependency: false,
            repodata_threads: 4,
            jlap_enabled: true,
            remote_connect_timeout: Duration::from_secs(30),
            remote_read_timeout: Duration::from_secs(60),
        }
    }
}
