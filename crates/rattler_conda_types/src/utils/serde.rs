//! Serde utilities for conda types.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A helper struct to deserialize types from a string without checking the
/// string.
pub struct DeserializeFromStrUnchecked;

/// A helper function used to sort map alphabetically when serializing.
pub(crate) fn sort_map_alphabetically<T: Serialize, H, S: serde::Serializer>(
    value: &HashMap<String, T, H>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}
