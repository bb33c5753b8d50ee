//! Utility modules providing various helper functionality.
//!
//! This module contains generic utilities and abstractions used throughout
//! the crate, including encoding handling and file locking.

pub use encoding::{AsyncEncoding, Encoding};

mod encoding;

#[cfg(test)]
pub(crate) mod simple_channel_server;

#[cfg(not(target_arch = "wasm32"))]
mod flock;

#[cfg(not(target_arch = "wasm32"))]
pub use flock::LockedFile;

/// Convert a fully-qualified repodata URL (subdir URL with the file name
/// already joined on, e.g. `.../linux-64/repodata.json`) to its cache-key
/// filename stem. Thin wrapper around [`crate::fetch::cache_key_for_subdir`]
/// for call sites that only have the joined URL at hand.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn url_to_cache_filename(url: &::url::Url) -> String {
    let (subdir_url, file_name) = crate::fetch::split_repodata_url(url);
    crate::fetch::cache_key_for_subdir(&subdir_url, &file_name)
}

/// A future that failed because it was cancelled.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("the operation was cancelled")]
pub(crate) struct Cancelled;
