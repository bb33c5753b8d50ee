use crate::fetch::FetchRepoDataError;
use crate::utils::Cancelled;
use rattler_conda_types::Channel;
use thiserror::Error;
use url::Url;

/// Errors that can occur while constructing or querying a [`crate::Gateway`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A local I/O operation failed.
    #[error("{0}")]
    IoError(String, #[source] std::io::Error),

    /// Fetching or caching the repodata for a subdirectory failed.
    #[error(transparent)]
    FetchRepoDataError(#[from] FetchRepoDataError),

    /// The subdirectory for a channel could not be found.
    #[error("subdirectory '{subdir}' of channel '{channel}' was not found", channel = channel.canonical_name())]
    SubdirNotFound {
        /// The channel that was queried.
        channel: Box<Channel>,
        /// The subdirectory (platform) that was queried.
        subdir: String,
    },

    /// A predicate restricted a query to an exact name but did not provide one where the gateway
    /// needed it (e.g. a match-spec without a package name used in a name-indexed lookup).
    #[error("a predicate without an exact package name cannot be used here")]
    PredicateWithoutExactName,

    /// A channel/subdir URL uses a scheme this gateway does not support.
    #[error("'{0}' is not a supported URL")]
    UnsupportedUrl(String),

    /// The on-disk cache directory could not be written to.
    #[error("cache for {0} is not writable")]
    CacheNotWritable(Url, #[source] std::io::Error),

    /// The cached or downloaded `repodata.json` failed to parse.
    #[error("repodata for {0} is corrupt, try clearing the index cache")]
    RepodataCorrupt(Url, #[source] serde_json::Error),

    /// The network is unreachable and no usable cache exists for this URL.
    #[error("{0} is unreachable and no cache is available")]
    NetworkUnavailable(Url),

    /// Catch-all for conditions that don't warrant their own variant.
    #[error("{0}")]
    Generic(String),

    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<Cancelled> for GatewayError {
    fn from(_: Cancelled) -> Self {
        GatewayError::Cancelled
    }
}

/// Turns a fetch-layer failure into the gateway's boundary vocabulary,
/// attaching the URL that was being fetched. `NotFound` is deliberately not
/// handled here: callers that know the channel/platform turn it into a
/// [`GatewayError::SubdirNotFound`] themselves.
pub(crate) fn classify_fetch_error(url: &Url, err: FetchRepoDataError) -> GatewayError {
    match err {
        FetchRepoDataError::InvalidJson(source) => {
            GatewayError::RepodataCorrupt(url.clone(), source)
        }
        FetchRepoDataError::IoError(source)
        | FetchRepoDataError::FailedToWriteCacheState(source)
        | FetchRepoDataError::FailedToGetMetadata(source)
        | FetchRepoDataError::FailedToCreateTemporaryFile(source) => {
            GatewayError::CacheNotWritable(url.clone(), source)
        }
        other => GatewayError::FetchRepoDataError(other),
    }
}

/// Same as [`classify_fetch_error`] but for errors raised while indexing
/// bytes that are already on disk (the pickle-miss JSON re-parse path).
pub(crate) fn classify_parse_error(url: Url, err: FetchRepoDataError) -> GatewayError {
    match err {
        FetchRepoDataError::InvalidJson(source) => GatewayError::RepodataCorrupt(url, source),
        other => GatewayError::FetchRepoDataError(other),
    }
}

/// `true` if `err` is the "schema too new" failure that aborts an entire
/// `query_all` rather than being isolated to one channel.
pub(crate) fn is_upgrade_error(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::FetchRepoDataError(FetchRepoDataError::UnsupportedRepodataVersion(_))
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsupported_repodata_version_is_an_upgrade_error() {
        let err =
            GatewayError::FetchRepoDataError(FetchRepoDataError::UnsupportedRepodataVersion(99));
        assert!(is_upgrade_error(&err));
    }

    #[test]
    fn subdir_not_found_is_not_an_upgrade_error() {
        let err = GatewayError::SubdirNotFound {
            channel: Box::new(Channel::from_url(Url::parse("https://example.com/c").unwrap())),
            subdir: "linux-64".to_string(),
        };
        assert!(!is_upgrade_error(&err));
    }
}
