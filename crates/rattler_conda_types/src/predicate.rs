use crate::PackageRecord;

/// Something that can be tested against a [`PackageRecord`] to decide
/// whether the record is a match.
///
/// The match-spec language itself (version ranges, build-string globs, ...)
/// is an external collaborator; this crate only defines the narrow seam the
/// query engine needs to stay generic over it: "does this predicate match
/// this record". Callers implement this trait for their own match-spec type
/// and hand it to the gateway's `query`/`query_all`.
pub trait Predicate {
    /// Returns the package name this predicate is restricted to, if it names
    /// exactly one. When this returns `Some`, the query engine looks the
    /// name up directly in the `by_name` index instead of scanning every
    /// record.
    fn exact_name(&self) -> Option<&str> {
        None
    }

    /// Returns the track-features this predicate restricts matches to, if
    /// any. When non-empty, the query engine unions the `by_track_feature`
    /// buckets for these features instead of scanning every record.
    fn track_features(&self) -> &[String] {
        &[]
    }

    /// Returns `true` if `record` satisfies this predicate.
    fn matches(&self, record: &PackageRecord) -> bool;
}

/// A predicate that matches records by exact package name, used directly
/// (without a match-spec implementation) and in tests.
#[derive(Debug, Clone)]
pub struct ExactName(pub String);

impl Predicate for ExactName {
    fn exact_name(&self) -> Option<&str> {
        Some(&self.0)
    }

    fn matches(&self, record: &PackageRecord) -> bool {
        record.name.as_normalized() == self.0
    }
}

/// A predicate that matches records advertising any of a set of track
/// features.
#[derive(Debug, Clone)]
pub struct HasTrackFeatures(pub Vec<String>);

impl Predicate for HasTrackFeatures {
    fn track_features(&self) -> &[String] {
        &self.0
    }

    fn matches(&self, record: &PackageRecord) -> bool {
        record
            .track_features
            .iter()
            .any(|f| self.0.iter().any(|want| want == f))
    }
}

/// A predicate matching an exact, fully-formed record: same name, version,
/// build and subdir.
#[derive(Debug, Clone)]
pub struct ExactRecord<'a>(pub &'a PackageRecord);

impl Predicate for ExactRecord<'_> {
    fn exact_name(&self) -> Option<&str> {
        Some(self.0.name.as_normalized())
    }

    fn matches(&self, record: &PackageRecord) -> bool {
        record == self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{NoArchType, PackageName};

    fn record(name: &str) -> PackageRecord {
        PackageRecord {
            name: PackageName::new_unchecked(name),
            version: "1.0".to_string(),
            build: "0".to_string(),
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
        }
    }

    #[test]
    fn exact_name_matches_only_that_name() {
        let predicate = ExactName("numpy".to_string());
        assert!(predicate.matches(&record("numpy")));
        assert!(!predicate.matches(&record("scipy")));
        assert_eq!(predicate.exact_name(), Some("numpy"));
    }

    #[test]
    fn track_features_union() {
        let mut r = record("numpy");
        r.track_features = vec!["old".to_string()];
        let predicate = HasTrackFeatures(vec!["old".to_string(), "broken".to_string()]);
        assert!(predicate.matches(&r));
        assert!(predicate.track_features().contains(&"old".to_string()));
    }
}
