//! The subdir facade and query engine.
//!
//! [`Gateway`] is the process-wide entry point. It memoizes one [`Subdir`]
//! per `(channel, platform)` pair (an explicit registry behind a mutex, not
//! metaclass magic) and answers predicate-based queries against one or many
//! channels concurrently.

mod allowlist;
mod builder;
mod channel_config;
mod config;
mod error;
mod index;
mod local_subdir;
mod pickle;
mod subdir;
mod subdir_builder;

use std::{collections::HashSet, sync::Arc};

pub use allowlist::{AllowAll, ChannelAllowlist};
pub use builder::GatewayBuilder;
pub use channel_config::{ChannelConfig, SourceConfig};
use coalesced_map::{CoalescedGetError, CoalescedMap};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use index::{IndexOptions, NoopVerifier, SignatureVerifier};
use rattler_conda_types::{Channel, Platform, Predicate, RepoDataRecord};
use reqwest_middleware::ClientWithMiddleware;
use subdir::Subdir;
use subdir_builder::SubdirBuilder;
use tracing::{instrument, Level};

use crate::Reporter;

/// Central access point for predicate-based queries about
/// [`rattler_conda_types::RepoDataRecord`]s across one or more channels.
///
/// Cheaply cloneable: internally reference counted, thread-safe, and safe to
/// share across an application. Requests for the same `(channel, platform)`
/// are deduplicated: if multiple callers query the same subdirectory
/// concurrently, only the first actually fetches or parses anything.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Default for Gateway {
    fn default() -> Self {
        Gateway::new()
    }
}

/// A selection of subdirectories, used by [`Gateway::clear_repodata_cache`].
#[derive(Default, Clone, Debug)]
pub enum SubdirSelection {
    /// Select all subdirectories.
    #[default]
    All,
    /// Select only these specific subdirectories (platform tags).
    Some(HashSet<String>),
}

impl SubdirSelection {
    /// Returns `true` if `subdir` is part of the selection.
    pub fn contains(&self, subdir: &str) -> bool {
        match self {
            SubdirSelection::All => true,
            SubdirSelection::Some(subdirs) => subdirs.contains(subdir),
        }
    }
}

impl Gateway {
    /// Constructs a gateway with the default configuration. Use
    /// [`Gateway::builder`] for more control.
    pub fn new() -> Self {
        Gateway::builder().finish()
    }

    /// Constructs a new [`GatewayBuilder`].
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Queries a single `(channel, platform)` subdirectory, returning every
    /// record matching `predicate`; each record is offered at most once.
    ///
    /// Cold subdirectories are loaded (fetched/cached/indexed) lazily on
    /// first query and memoized for subsequent calls.
    #[instrument(skip(self, predicate, reporter), fields(channel = %channel.base_url, platform = %platform))]
    pub async fn query<P>(
        &self,
        channel: &Channel,
        platform: Platform,
        predicate: &P,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Result<Vec<Arc<RepoDataRecord>>, GatewayError>
    where
        P: Predicate + ?Sized,
    {
        let subdir = self
            .inner
            .get_or_load_subdir(channel, platform, reporter)
            .await?;
        Ok(subdir.query(predicate))
    }

    /// Expands `channels` × `platforms` to subdirectory URLs, filters them
    /// through the configured [`ChannelAllowlist`], and queries each in
    /// parallel bounded by [`GatewayConfig::repodata_threads`].
    ///
    /// In offline mode, only `file://` channels are queried; the rest are
    /// skipped with an info-level log line. Results are the concatenation of
    /// per-(channel, platform) matches in channel/platform enumeration
    /// order; there is no deduplication across channels.
    ///
    /// A single subdirectory's fatal error does not abort the others unless
    /// it is an `UnsupportedRepodataVersion` ("Upgrade") error, which aborts
    /// the whole aggregate.
    pub async fn query_all<P>(
        &self,
        channels: &[Channel],
        platforms: &[Platform],
        predicate: &P,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Result<Vec<Arc<RepoDataRecord>>, GatewayError>
    where
        P: Predicate + ?Sized,
    {
        use futures::stream::{self, StreamExt};

        let pairs: Vec<(usize, &Channel, Platform)> = channels
            .iter()
            .flat_map(|channel| platforms.iter().map(move |&platform| (channel, platform)))
            .enumerate()
            .map(|(idx, (channel, platform))| (idx, channel, platform))
            .filter(|(_, channel, _)| {
                if !self.inner.allowlist.is_allowed(channel) {
                    tracing::info!(channel = %channel.canonical_name(), "channel not in allowlist, skipping");
                    return false;
                }
                if self.inner.config.offline && channel.base_url.scheme() != "file" {
                    tracing::info!(channel = %channel.canonical_name(), "offline mode: skipping non-file:// channel");
                    return false;
                }
                true
            })
            .collect();

        let concurrency = self.inner.config.repodata_threads.max(1);

        let mut results: Vec<(usize, Result<Vec<Arc<RepoDataRecord>>, GatewayError>)> =
            stream::iter(pairs.into_iter().map(|(idx, channel, platform)| {
                let reporter = reporter.clone();
                async move {
                    let result = self.query(channel, platform, predicate, reporter).await;
                    (idx, result)
                }
            }))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);

        let mut all_records = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(records) => all_records.extend(records),
                Err(err) if error::is_upgrade_error(&err) => return Err(err),
                Err(err) => {
                    tracing::warn!(%err, pair_index = idx, "channel query failed, isolating from sibling channels");
                }
            }
        }

        Ok(all_records)
    }

    /// Clears any in-memory cache for `channel`. Any subsequent query
    /// re-loads the affected subdirectories from the on-disk cache (or the
    /// network, if stale).
    pub fn clear_repodata_cache(&self, channel: &Channel, subdirs: SubdirSelection) {
        self.inner.subdirs.retain(|key, _| {
            key.0.base_url != channel.base_url || !subdirs.contains(key.1.as_str())
        });
    }
}

pub(crate) struct GatewayInner {
    /// Process-wide memo of `(channel, platform) -> Subdir`: an explicit
    /// registry with `get_or_create(key)` coalescing under the hood.
    subdirs: CoalescedMap<(Channel, Platform), Arc<Subdir>>,
    client: ClientWithMiddleware,
    channel_config: ChannelConfig,
    config: GatewayConfig,
    cache: std::path::PathBuf,
    allowlist: Arc<dyn ChannelAllowlist>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl GatewayInner {
    /// Returns the memoized [`Subdir`] for `(channel, platform)`, creating
    /// and loading it on first request. Concurrent requests for the same
    /// key are coalesced: only the first actually loads anything.
    #[instrument(skip(self, reporter, channel), fields(channel = %channel.base_url), err(level = Level::INFO))]
    async fn get_or_load_subdir(
        &self,
        channel: &Channel,
        platform: Platform,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Result<Arc<Subdir>, GatewayError> {
        if self.config.offline && channel.base_url.scheme() != "file" {
            return Err(GatewayError::NetworkUnavailable(channel.base_url.clone()));
        }

        let key = (channel.clone(), platform);
        let channel = channel.clone();

        let subdir = self
            .subdirs
            .get_or_try_init(key.clone(), || async move {
                let subdir = SubdirBuilder::new(self, channel.clone(), platform, reporter)
                    .build()
                    .await?;
                Ok::<_, GatewayError>(Arc::new(subdir))
            })
            .await
            .map_err(|e| match e {
                CoalescedGetError::Init(gateway_err) => gateway_err,
                CoalescedGetError::CoalescedRequestFailed => GatewayError::IoError(
                    "a coalesced request failed".to_string(),
                    std::io::ErrorKind::Other.into(),
                ),
            })?;

        // Local `file://` channels are invalidated when the source file's
        // mtime advances past the memoized instance's creation time.
        if subdir.has_expired() {
            self.subdirs.retain(|k, _| k != &key);
            return Box::pin(self.get_or_load_subdir(&key.0, platform, None)).await;
        }

        Ok(subdir)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use rattler_conda_types::{Channel, ExactName, Platform};
    use url::Url;

    use crate::Gateway;

    use super::GatewayError;

    #[tokio::test]
    async fn querying_a_missing_local_channel_returns_empty() {
        let gateway = Gateway::new();
        let channel = Channel::from_directory(&std::path::PathBuf::from("/does/not/exist"));
        let records = gateway
            .query(&channel, Platform::Linux64, &ExactName("a".to_string()), None)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_an_error() {
        let gateway = Gateway::new();
        let channel = Channel::from_url(Url::parse("ftp://example.com/channel").unwrap());
        let err = gateway
            .query(&channel, Platform::Linux64, &ExactName("a".to_string()), None)
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::UnsupportedUrl(_));
    }
}
