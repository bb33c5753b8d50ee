//! Turns a raw `repodata.json` document into the package index a subdir's
//! queries are served from: JSON parsing, `.conda`/`.tar.bz2` deduplication,
//! dependency post-processing, and the by-name / by-track-feature buckets.

use std::{collections::HashMap, sync::Arc};

use rattler_conda_types::{
    compute_package_url, Channel, PackageRecord, Platform, Predicate, RepoDataRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::fetch::FetchRepoDataError;

/// Verifies the authenticity of individual repodata entries before they are
/// turned into records. Signature verification itself is an external
/// collaborator; this only defines the seam the indexer calls into.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` if `file_name`'s raw JSON entry is authentic and may be
    /// turned into a record. Called before the entry is mutated in any way.
    fn verify(&self, file_name: &str, entry: &Value) -> bool;
}

/// A verifier that accepts every entry, used for channels without signature
/// metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerifier;

impl SignatureVerifier for NoopVerifier {
    fn verify(&self, _file_name: &str, _entry: &Value) -> bool {
        true
    }
}

/// Options that influence how a `repodata.json` document is turned into a
/// [`SubdirIndex`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Exclude `packages.conda` entirely, keeping only `.tar.bz2` entries.
    pub use_only_tar_bz2: bool,
    /// Append `"pip"` to the dependencies of `python` 2.x/3.x records.
    pub add_pip_as_python_dependency: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            use_only_tar_bz2: false,
            add_pip_as_python_dependency: false,
        }
    }
}

/// The highest `repodata_version` this indexer understands.
pub const MAX_REPODATA_VERSION: u64 = 2;

/// A fully parsed and indexed repodata document for one (channel, platform).
///
/// Built once from the raw JSON and never mutated afterwards. `by_name` and
/// `by_track_feature` hold `Arc` clones of the same records as `records`, so
/// querying by name or by feature never needs to scan every record.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SubdirIndex {
    records: Vec<Arc<RepoDataRecord>>,
    by_name: HashMap<String, Vec<Arc<RepoDataRecord>>>,
    by_track_feature: HashMap<String, Vec<Arc<RepoDataRecord>>>,
}

impl SubdirIndex {
    /// Total number of records in the index.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The distinct package names present in the index.
    pub fn package_names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    /// All records for an exact package name.
    pub fn records_for_name(&self, name: &str) -> Vec<Arc<RepoDataRecord>> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    /// Runs `predicate` against this index, selecting a single backing
    /// collection so a record is never offered twice for one query.
    pub fn query<P: Predicate + ?Sized>(&self, predicate: &P) -> Vec<Arc<RepoDataRecord>> {
        if let Some(name) = predicate.exact_name() {
            return self
                .by_name
                .get(name)
                .into_iter()
                .flatten()
                .filter(|record| predicate.matches(&record.package_record))
                .cloned()
                .collect();
        }

        let features = predicate.track_features();
        if !features.is_empty() {
            let mut seen = ahash::HashSet::<*const RepoDataRecord>::default();
            let mut out = Vec::new();
            for feature in features {
                for record in self.by_track_feature.get(feature).into_iter().flatten() {
                    if predicate.matches(&record.package_record) && seen.insert(Arc::as_ptr(record))
                    {
                        out.push(record.clone());
                    }
                }
            }
            return out;
        }

        self.records
            .iter()
            .filter(|record| predicate.matches(&record.package_record))
            .cloned()
            .collect()
    }

    fn push(&mut self, record: RepoDataRecord) {
        let record = Arc::new(record);
        self.by_name
            .entry(record.package_record.name.as_normalized().to_string())
            .or_default()
            .push(record.clone());
        for feature in &record.package_record.track_features {
            self.by_track_feature
                .entry(feature.clone())
                .or_default()
                .push(record.clone());
        }
        self.records.push(record);
    }

    /// Parses a raw `repodata.json` document into an index for `platform` of
    /// `channel`.
    pub fn parse(
        bytes: &[u8],
        channel: &Channel,
        platform: Platform,
        verifier: &dyn SignatureVerifier,
        options: &IndexOptions,
    ) -> Result<Self, FetchRepoDataError> {
        let document: Value = serde_json::from_slice(bytes)?;

        if let Some(version) = document.get("repodata_version").and_then(Value::as_u64) {
            if version > MAX_REPODATA_VERSION {
                return Err(FetchRepoDataError::UnsupportedRepodataVersion(version));
            }
        }

        let subdir = platform.as_str();
        if let Some(reported_subdir) = document
            .get("info")
            .and_then(|info| info.get("subdir"))
            .and_then(Value::as_str)
        {
            if reported_subdir != subdir {
                return Err(FetchRepoDataError::SubdirMismatch {
                    subdir: subdir.to_string(),
                    reported: reported_subdir.to_string(),
                });
            }
        }

        let base_url = document
            .get("info")
            .and_then(|info| info.get("base_url"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let channel_url = channel.platform_url(platform);

        // `arch`/`platform` in `info` are common-to-the-document metadata,
        // the same way `subdir` is: every entry gets them, overwriting
        // whatever the entry itself might already carry.
        let info = document.get("info");
        let common_arch = info
            .and_then(|info| info.get("arch"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let common_platform = info
            .and_then(|info| info.get("platform"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut packages = as_object_map(document.get("packages"));
        let conda_packages = if options.use_only_tar_bz2 {
            HashMap::new()
        } else {
            as_object_map(document.get("packages.conda"))
        };

        let mut index = SubdirIndex::default();

        for (file_name, mut entry) in conda_packages {
            let Some(stem) = file_name.strip_suffix(".conda") else {
                continue;
            };
            if let Some(sibling) = packages.remove(&format!("{stem}.tar.bz2")) {
                if let Some(md5) = sibling.get("md5").cloned() {
                    entry["legacy_bz2_md5"] = md5;
                }
                if let Some(size) = sibling.get("size").cloned() {
                    entry["legacy_bz2_size"] = size;
                }
            }
            if let Some(record) = entry_to_record(
                &file_name,
                entry,
                channel,
                &channel_url,
                base_url.as_deref(),
                subdir,
                common_arch.as_deref(),
                common_platform.as_deref(),
                verifier,
                options,
            )? {
                index.push(record);
            }
        }

        for (file_name, entry) in packages {
            if let Some(record) = entry_to_record(
                &file_name,
                entry,
                channel,
                &channel_url,
                base_url.as_deref(),
                subdir,
                common_arch.as_deref(),
                common_platform.as_deref(),
                verifier,
                options,
            )? {
                index.push(record);
            }
        }

        Ok(index)
    }
}

fn as_object_map(value: Option<&Value>) -> HashMap<String, Value> {
    value
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
fn entry_to_record(
    file_name: &str,
    mut entry: Value,
    channel: &Channel,
    channel_url: &Url,
    base_url: Option<&str>,
    subdir: &str,
    common_arch: Option<&str>,
    common_platform: Option<&str>,
    verifier: &dyn SignatureVerifier,
    options: &IndexOptions,
) -> Result<Option<RepoDataRecord>, FetchRepoDataError> {
    let record_version = entry
        .get("record_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if record_version > 1 {
        return Ok(None);
    }

    if !verifier.verify(file_name, &entry) {
        return Ok(None);
    }

    // Matches the original's `meta_in_common`: `subdir`, `arch` and
    // `platform` are common to the whole document and unconditionally
    // overwrite whatever an individual entry carries.
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("subdir".to_string(), Value::String(subdir.to_string()));
        if let Some(arch) = common_arch {
            obj.insert("arch".to_string(), Value::String(arch.to_string()));
        }
        if let Some(platform) = common_platform {
            obj.insert(
                "platform".to_string(),
                Value::String(platform.to_string()),
            );
        }
    }

    let mut record: PackageRecord = serde_json::from_value(entry)?;

    if options.add_pip_as_python_dependency
        && record.name.as_normalized() == "python"
        && (record.version.starts_with("2.") || record.version.starts_with("3."))
        && !record.depends.iter().any(|dep| dep.starts_with("pip"))
    {
        record.depends.push("pip".to_string());
    }

    let url = compute_package_url(channel_url, base_url, file_name);

    Ok(Some(RepoDataRecord {
        package_record: record,
        file_name: file_name.to_string(),
        url,
        channel: channel.canonical_name(),
    }))
}
