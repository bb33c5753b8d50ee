//! Loads repodata for `file://` channels directly off disk, bypassing the
//! HTTP fetch/cache orchestrator entirely: a local channel's
//! `repodata.json` is read and indexed directly, and is not cached a
//! second time alongside itself.

use std::path::Path;
use std::time::SystemTime;

use rattler_conda_types::{Channel, Platform};
use tokio::task::JoinError;

use crate::gateway::error::classify_parse_error;
use crate::gateway::index::{IndexOptions, NoopVerifier, SubdirIndex};
use crate::gateway::subdir::{IndexSource, SubdirData};
use crate::gateway::GatewayError;

/// Reads and indexes `<channel_dir>/<platform>/repodata.json`.
///
/// Returns `Ok(None)` if the file does not exist — a missing subdirectory is
/// not an error for local channels, it just means the subdirectory is
/// empty (mirrors the offline/nothing-cached case for remote channels).
pub async fn load_local(
    repodata_path: &Path,
    channel: &Channel,
    platform: Platform,
    options: &IndexOptions,
) -> Result<Option<SubdirData>, GatewayError> {
    let metadata = match fs_err::tokio::metadata(repodata_path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(GatewayError::IoError(
                format!("failed to stat {}", repodata_path.display()),
                err,
            ))
        }
    };
    let mtime_at_load = metadata
        .modified()
        .unwrap_or_else(|_| SystemTime::now());

    let bytes = fs_err::tokio::read(repodata_path)
        .await
        .map_err(|err| {
            GatewayError::IoError(format!("failed to read {}", repodata_path.display()), err)
        })?;

    let path = repodata_path.to_path_buf();
    let channel = channel.clone();
    let options = options.clone();
    let index = match tokio::task::spawn_blocking(move || {
        SubdirIndex::parse(&bytes, &channel, platform, &NoopVerifier, &options)
    })
    .await
    .map_err(JoinError::try_into_panic)
    {
        Ok(Ok(index)) => index,
        Ok(Err(err)) => {
            let url = Channel::from_directory(path.parent().unwrap_or(&path))
                .base_url
                .clone();
            return Err(classify_parse_error(url, err));
        }
        Err(Ok(panic)) => std::panic::resume_unwind(panic),
        Err(Err(_)) => {
            return Err(GatewayError::IoError(
                "parsing of the local repodata was cancelled".to_string(),
                std::io::ErrorKind::Interrupted.into(),
            ))
        }
    };

    Ok(Some(SubdirData::new(
        index,
        IndexSource::Local {
            path: repodata_path.to_path_buf(),
            mtime_at_load,
        },
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr as _;
    use url::Url;

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Channel::from_url(Url::parse("file:///channel").unwrap());
        let result = load_local(
            &dir.path().join("repodata.json"),
            &channel,
            Platform::from_str("linux-64").unwrap(),
            &IndexOptions::default(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn reads_and_indexes_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "info": {"subdir": "linux-64"},
                "packages": {
                    "a-1-0.tar.bz2": {"name": "a", "version": "1", "build": "0", "depends": []}
                }
            })
            .to_string(),
        )
        .unwrap();

        let channel = Channel::from_directory(dir.path());
        let data = load_local(
            &path,
            &channel,
            Platform::from_str("linux-64").unwrap(),
            &IndexOptions::default(),
        )
        .await
        .unwrap()
        .expect("file exists");
        assert_eq!(data.package_names(), vec!["a".to_string()]);
        assert!(!data.has_expired());
    }
}
