//! The pickled-index sidecar: a fast re-load path for a subdirectory's
//! parsed [`SubdirIndex`] that skips re-parsing `repodata.json` on every
//! process start.
//!
//! This deliberately does not lean on a language-native serialization
//! format to decide validity: the fingerprint that gates a sidecar is
//! plain header data, checked before the (often large) body is even
//! decoded, so a version bump or a mismatched source never needs to
//! round-trip the full index to be rejected.

use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::gateway::index::SubdirIndex;

/// Bumped whenever the binary layout of [`PickledSidecar`] or [`SubdirIndex`]
/// changes incompatibly.
const PICKLE_VERSION: u32 = 1;

/// The seven fields whose combination must match for a sidecar to be
/// trusted: url, canonical channel name, pip-as-dep policy, `mod`,
/// `etag`, pickle-schema version, and repodata filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    url: String,
    canonical_name: String,
    add_pip_as_python_dependency: bool,
    last_modified: Option<String>,
    etag: Option<String>,
    pickle_version: u32,
    repodata_filename: String,
}

impl Fingerprint {
    /// Builds the fingerprint that the sidecar for the current acquisition
    /// must match to be trusted.
    pub fn current(
        url: &str,
        canonical_name: &str,
        add_pip_as_python_dependency: bool,
        last_modified: Option<&str>,
        etag: Option<&str>,
        repodata_filename: &str,
    ) -> Self {
        Self {
            url: url.to_string(),
            canonical_name: canonical_name.to_string(),
            add_pip_as_python_dependency,
            last_modified: last_modified.map(str::to_owned),
            etag: etag.map(str::to_owned),
            pickle_version: PICKLE_VERSION,
            repodata_filename: repodata_filename.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PickledSidecar {
    fingerprint: Fingerprint,
    index: SubdirIndex,
}

/// Writes `index` to `path` (the `<key>.q` sidecar), tagged with
/// `fingerprint`, atomically.
pub fn save(path: &Path, fingerprint: &Fingerprint, index: &SubdirIndex) -> std::io::Result<()> {
    let sidecar = PickledSidecar {
        fingerprint: fingerprint.clone(),
        index: index.clone(),
    };
    let bytes = rmp_serde::to_vec(&sidecar)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, &bytes)?;
    tmp.persist(path)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    Ok(())
}

/// Loads `<key>.q` and returns its index only if `expected` matches its
/// fingerprint exactly. Any read, deserialize, or mismatch outcome
/// returns `None` — the sidecar is never the sole source of truth, so a
/// miss always falls back silently to a JSON re-parse.
pub fn load(path: &Path, expected: &Fingerprint) -> Option<SubdirIndex> {
    let bytes = fs::read(path).ok()?;
    let sidecar: PickledSidecar = rmp_serde::from_slice(&bytes).ok()?;
    if &sidecar.fingerprint != expected {
        return None;
    }
    Some(sidecar.index)
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
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.q");
        let index = sample_index();
        let fingerprint = Fingerprint::current(
            "https://conda.anaconda.org/conda-forge/linux-64/",
            "conda-forge",
            false,
            Some("Mon, 01 Jan 2024 00:00:00 GMT"),
            Some("\"etag\""),
            "repodata.json",
        );

        save(&path, &fingerprint, &index).unwrap();
        let loaded = load(&path, &fingerprint).expect("sidecar should load");
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.query(&ExactName("a".to_string())).len(), 1);
    }

    #[test]
    fn mismatched_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.q");
        let index = sample_index();
        let fingerprint =
            Fingerprint::current("https://conda.anaconda.org/conda-forge/linux-64/", "conda-forge", false, None, None, "repodata.json");
        save(&path, &fingerprint, &index).unwrap();

        let mut other = fingerprint.clone();
        other.etag = Some("\"different\"".to_string());
        assert!(load(&path, &other).is_none());
    }

    #[test]
    fn missing_file_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.q");
        let fingerprint = Fingerprint::current("u", "c", false, None, None, "repodata.json");
        assert!(load(&path, &fingerprint).is_none());
    }
}
