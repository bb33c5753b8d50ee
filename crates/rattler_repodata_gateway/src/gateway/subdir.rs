//! C9: the in-process facade over a single channel subdirectory's index.
//!
//! A [`Subdir`] is what [`super::GatewayInner::get_or_load_subdir`] memoizes
//! per `(url, repodata filename)` pair. It wraps the parsed
//! [`SubdirIndex`][crate::gateway::index::SubdirIndex] together with enough
//! bookkeeping to decide, on a later query, whether the data backing it is
//! still fresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use rattler_conda_types::{Predicate, RepoDataRecord};

use crate::gateway::index::SubdirIndex;

/// Where a [`SubdirData`]'s index was loaded from, and what it takes for it
/// to go stale.
#[derive(Debug)]
pub enum IndexSource {
    /// Loaded over HTTP(S); freshness is governed entirely by the cache
    /// orchestrator the next time this subdirectory is reloaded, not by
    /// this facade.
    Remote,

    /// Loaded directly off disk for a `file://` channel. Staleness is
    /// decided by comparing the file's current mtime against the mtime
    /// observed when it was loaded.
    Local {
        path: PathBuf,
        mtime_at_load: SystemTime,
    },
}

/// A subdirectory that was successfully indexed.
#[derive(Debug, Clone)]
pub struct SubdirData {
    pub(crate) index: Arc<SubdirIndex>,
    pub(crate) created_at: SystemTime,
    pub(crate) source: Arc<IndexSource>,
}

impl SubdirData {
    pub fn new(index: SubdirIndex, source: IndexSource) -> Self {
        Self {
            index: Arc::new(index),
            created_at: SystemTime::now(),
            source: Arc::new(source),
        }
    }

    /// Runs `predicate` against the index, returning every matching record
    /// exactly once.
    pub fn query<P: Predicate + ?Sized>(&self, predicate: &P) -> Vec<Arc<RepoDataRecord>> {
        self.index.query(predicate)
    }

    pub fn package_names(&self) -> Vec<String> {
        self.index.package_names()
    }

    /// `true` if this was loaded from a `file://` channel whose on-disk
    /// `repodata.json` has since been modified.
    pub fn has_expired(&self) -> bool {
        match self.source.as_ref() {
            IndexSource::Remote => false,
            IndexSource::Local {
                path,
                mtime_at_load,
            } => {
                let Ok(metadata) = std::fs::metadata(path) else {
                    // The file disappeared or became unreadable; treat that
                    // as expired so the next query re-attempts the load and
                    // surfaces the real error.
                    return true;
                };
                match metadata.modified() {
                    Ok(mtime) => mtime > *mtime_at_load,
                    Err(_) => true,
                }
            }
        }
    }
}

/// The outcome of loading a single channel subdirectory.
#[derive(Debug, Clone)]
pub enum Subdir {
    /// The subdirectory does not exist (offline with nothing cached, or a
    /// `file://` channel missing its `repodata.json`). Queries against it
    /// behave as if it were empty rather than erroring.
    NotFound,

    /// The subdirectory was found and indexed.
    Found(SubdirData),
}

impl Subdir {
    pub fn package_names(&self) -> Vec<String> {
        match self {
            Subdir::Found(data) => data.package_names(),
            Subdir::NotFound => Vec::new(),
        }
    }

    pub fn query<P: Predicate + ?Sized>(&self, predicate: &P) -> Vec<Arc<RepoDataRecord>> {
        match self {
            Subdir::Found(data) => data.query(predicate),
            Subdir::NotFound => Vec::new(),
        }
    }

    /// `true` if this memoized entry should be dropped and reloaded before
    /// being used to answer another query.
    pub fn has_expired(&self) -> bool {
        match self {
            Subdir::Found(data) => data.has_expired(),
            Subdir::NotFound => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gateway::index::{IndexOptions, NoopVerifier};
    use rattler_conda_types::{Channel, ExactName, Platform};
    use std::str::FromStr as _;
    use url::Url;

    fn sample_index() -> SubdirIndex {
        let json = serde_json::json!({
            "info": {"subdir": "linux-64"},
            "packages": {
                "a-1-0.tar.bz2": {"name": "a", "version": "1", "build": "0", "depends": []}
            }
        });
        SubdirIndex::parse(
            json.to_string().as_bytes(),
            &Channel::from_url(Url::parse("https://conda.anaconda.org/conda-forge").unwrap()),
            Platform::from_str("linux-64").unwrap(),
            &NoopVerifier,
            &IndexOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn not_found_subdir_queries_as_empty() {
        let subdir = Subdir::NotFound;
        assert!(subdir.package_names().is_empty());
        assert!(subdir.query(&ExactName("a".to_string())).is_empty());
        assert!(!subdir.has_expired());
    }

    #[test]
    fn remote_source_never_expires_on_its_own() {
        let data = SubdirData::new(sample_index(), IndexSource::Remote);
        assert!(!data.has_expired());
        assert_eq!(data.query(&ExactName("a".to_string())).len(), 1);
    }

    #[test]
    fn local_source_expires_when_mtime_advances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.json");
        std::fs::write(&path, "{}").unwrap();
        let mtime_at_load = std::fs::metadata(&path).unwrap().modified().unwrap();

        let data = SubdirData::new(
            sample_index(),
            IndexSource::Local {
                path: path.clone(),
                mtime_at_load,
            },
        );
        assert!(!data.has_expired());

        // Bump the mtime forward.
        let newer = mtime_at_load + std::time::Duration::from_secs(5);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(newer)).unwrap();
        assert!(data.has_expired());
    }
}
