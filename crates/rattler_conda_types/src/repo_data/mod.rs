//! Defines [`RepoData`]. `RepoData` stores information of all packages present
//! in a subdirectory of a channel. It provides indexing functionality.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::{Display, Formatter},
    path::Path,
};

use rattler_digest::{serde::SerializableHash, Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};
use url::Url;

use crate::{
    utils::serde::{sort_map_alphabetically, DeserializeFromStrUnchecked},
    NoArchType, PackageName,
};

/// [`RepoData`] is an index of package binaries available on in a subdirectory
/// of a Conda channel.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// The channel information contained in the repodata.json file
    pub info: Option<ChannelInfo>,

    /// The tar.bz2 packages contained in the repodata.json file
    #[serde(default, serialize_with = "sort_map_alphabetically")]
    pub packages: HashMap<String, PackageRecord>,

    /// The conda packages contained in the repodata.json file (under a
    /// different key for backwards compatibility with previous conda
    /// versions)
    #[serde(
        default,
        rename = "packages.conda",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: HashMap<String, PackageRecord>,

    /// removed packages (files are still accessible, but they are not
    /// installable like regular packages)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<String>,

    /// The version of the repodata format
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

/// Information about subdirectory of channel in the Conda [`RepoData`]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory
    pub subdir: String,

    /// The `base_url` for all package urls. Can be an absolute or relative url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single record in the Conda repodata. A single record refers to a single
/// binary distribution of a package on a Conda channel.
///
/// Only the fields the gateway indexes on are modeled here; the full package
/// record schema (purls, run_exports, license metadata, ...) is the solver's
/// concern and is out of scope for this crate.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct PackageRecord {
    /// The name of the package
    #[serde_as(deserialize_as = "DeserializeFromStrUnchecked")]
    pub name: PackageName,

    /// The version of the package, kept as the raw source string: parsing
    /// and comparing version strings is a solver concern handled outside
    /// this crate.
    pub version: String,

    /// The build string of the package
    pub build: String,

    /// The build number of the package
    #[serde(default)]
    pub build_number: u64,

    /// The subdirectory where the package can be found
    #[serde(default)]
    pub subdir: String,

    /// Specification of packages this package depends on
    #[serde(default)]
    pub depends: Vec<String>,

    /// Additional constraints on packages. `constrains` are different from
    /// `depends` in that packages specified in `depends` must be installed
    /// next to this package, whereas packages specified in `constrains` are
    /// not required to be installed, but if they are installed they must
    /// follow these constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Track features are used to downweight packages (give them less
    /// priority); the gateway indexes these so callers can find all records
    /// that carry a given feature.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// If this package is independent of architecture this field specifies
    /// in what way. See [`NoArchType`] for more information.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the architecture the package supports
    pub arch: Option<String>,

    /// Optionally the platform the package supports
    pub platform: Option<String>,

    /// Optionally the size of the package archive in bytes
    pub size: Option<u64>,

    /// Optionally a SHA256 hash of the package archive
    #[serde_as(as = "Option<SerializableHash::<rattler_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// Optionally a MD5 hash of the package archive
    #[serde_as(as = "Option<SerializableHash::<rattler_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The MD5 hash of the equivalent `.tar.bz2` package, carried over when a
    /// `.conda` record is chosen over its `.tar.bz2` duplicate during
    /// indexing so that callers pinned to the legacy archive can still
    /// verify it.
    #[serde_as(as = "Option<SerializableHash::<rattler_digest::Md5>>")]
    pub legacy_bz2_md5: Option<Md5Hash>,

    /// The size in bytes of the equivalent `.tar.bz2` package, carried over
    /// alongside `legacy_bz2_md5`.
    pub legacy_bz2_size: Option<u64>,

    /// The date this entry was created, as milliseconds since the Unix
    /// epoch.
    pub timestamp: Option<i64>,
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

impl RepoData {
    /// Parses [`RepoData`] from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` specified in the repodata.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }
}

/// Computes the URL for a package.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let mut absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Err(url::ParseError::RelativeUrlWithoutBase) if !base_url.starts_with('/') => {
                let mut base = repo_data_base_url.clone();
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                base.join(base_url)
                    .expect("failed to join base_url with channel")
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = repo_data_base_url.clone();
                url.set_path(base_url);
                url
            }
            Err(e) => unreachable!("{e}"),
            Ok(base_url) => base_url,
        },
    };

    let path = absolute_url.path();
    if !path.ends_with('/') {
        absolute_url.set_path(&format!("{path}/"));
    }
    absolute_url
        .join(filename)
        .expect("failed to join base_url and filename")
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serialize() {
        let repodata = RepoData {
            version: Some(2),
            info: None,
            packages: HashMap::default(),
            conda_packages: HashMap::default(),
            removed: ["xyz", "foo", "bar"].iter().map(|s| (*s).to_string()).collect(),
        };
        let json = serde_json::to_string(&repodata).unwrap();
        assert!(json.contains("\"repodata_version\":2"));
        assert!(json.contains("\"removed\""));
    }

    #[test]
    fn test_compute_package_url_relative() {
        let base = Url::parse("https://conda.anaconda.org/conda-forge/linux-64/").unwrap();
        assert_eq!(
            compute_package_url(&base, None, "bla.conda").to_string(),
            "https://conda.anaconda.org/conda-forge/linux-64/bla.conda"
        );
        assert_eq!(
            compute_package_url(&base, Some("https://host.some.org"), "bla.conda").to_string(),
            "https://host.some.org/bla.conda"
        );
        assert_eq!(
            compute_package_url(&base, Some("/root"), "bla.conda").to_string(),
            "https://conda.anaconda.org/root/bla.conda"
        );
    }

    #[test]
    fn test_display() {
        let record = PackageRecord {
            name: PackageName::new_unchecked("numpy"),
            version: "1.26.0".to_string(),
            build: "py311h1234abc_0".to_string(),
            build_number: 0,
            subdir: "linux-64".to_string(),
            depends: vec![],
            constrains: vec![],
            track_features: vec![],
            noarch: NoArchType::none(),
            arch: None,
            platform: None,
            size: None,
            sha256: None,
            md5: None,
            legacy_bz2_md5: None,
            legacy_bz2_size: None,
            timestamp: None,
        };
        assert_eq!(record.to_string(), "numpy=1.26.0=py311h1234abc_0");
    }
}
