//! Builds a [`Subdir`] for one `(channel, platform)` pair: dispatches to the
//! local `file://` reader or to the HTTP acquisition orchestrator, then
//! indexes and pickles the result.

use std::sync::Arc;

use file_url::url_to_path;
use tracing::instrument;

use crate::{
    fetch::{fetch_repo_data, FetchRepoDataError, FetchRepoDataOptions},
    gateway::{
        error::classify_fetch_error,
        index::{IndexOptions, SubdirIndex},
        local_subdir,
        pickle::{self, Fingerprint},
        subdir::{IndexSource, Subdir, SubdirData},
        GatewayError, GatewayInner,
    },
    Reporter,
};
use rattler_conda_types::{Channel, Platform};

/// Builds a single [`Subdir`] on behalf of [`GatewayInner::get_or_load_subdir`].
pub struct SubdirBuilder<'g> {
    channel: Channel,
    platform: Platform,
    reporter: Option<Arc<dyn Reporter>>,
    gateway: &'g GatewayInner,
}

impl<'g> SubdirBuilder<'g> {
    pub fn new(
        gateway: &'g GatewayInner,
        channel: Channel,
        platform: Platform,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Self {
        Self {
            channel,
            platform,
            reporter,
            gateway,
        }
    }

    #[instrument(skip(self), fields(channel = %self.channel.base_url, platform = %self.platform))]
    pub async fn build(self) -> Result<Subdir, GatewayError> {
        let subdir_url = self.channel.platform_url(self.platform);

        let result = match subdir_url.scheme() {
            "file" => self.build_local(&subdir_url).await,
            "http" | "https" => self.build_remote(&subdir_url).await,
            other => {
                return Err(GatewayError::UnsupportedUrl(format!(
                    "'{other}' is not a supported scheme"
                )))
            }
        };

        match result {
            Ok(data) => Ok(Subdir::Found(data)),
            Err(GatewayError::FetchRepoDataError(FetchRepoDataError::NotFound(err)))
                if self.platform != Platform::NoArch =>
            {
                // A missing subdirectory for a non-noarch platform just
                // means the channel doesn't build for that platform.
                tracing::info!(
                    channel = %self.channel.canonical_name(),
                    platform = %self.platform,
                    %err,
                    "subdirectory not found, treating as empty"
                );
                Ok(Subdir::NotFound)
            }
            Err(GatewayError::FetchRepoDataError(FetchRepoDataError::NotFound(err))) => {
                Err(GatewayError::SubdirNotFound {
                    channel: Box::new(self.channel.clone()),
                    subdir: self.platform.to_string(),
                })
                .map_err(|outer| {
                    tracing::debug!(%err, "noarch subdirectory missing");
                    outer
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn build_local(&self, subdir_url: &url::Url) -> Result<SubdirData, GatewayError> {
        let Some(dir) = url_to_path(subdir_url) else {
            return Err(GatewayError::UnsupportedUrl(
                "file:// url does not map to a local path".to_string(),
            ));
        };
        let repodata_path = dir.join("repodata.json");

        let options = IndexOptions {
            use_only_tar_bz2: self.gateway.config.use_only_tar_bz2,
            add_pip_as_python_dependency: self.gateway.config.add_pip_as_python_dependency,
        };

        match local_subdir::load_local(&repodata_path, &self.channel, self.platform, &options)
            .await?
        {
            Some(data) => Ok(data),
            None => Err(GatewayError::FetchRepoDataError(
                FetchRepoDataError::NotFound(crate::fetch::DataNotFoundError::FileSystemError(
                    std::io::Error::new(std::io::ErrorKind::NotFound, "repodata.json not found"),
                )),
            )),
        }
    }

    async fn build_remote(&self, subdir_url: &url::Url) -> Result<SubdirData, GatewayError> {
        let source_config = self.gateway.channel_config.get(&self.channel);
        let config = &self.gateway.config;

        // `use_index_cache` pins every channel to the cache the same way an
        // explicit `CacheAction::UseCacheOnly` would, short-circuiting past
        // revalidation entirely.
        let cache_action = if config.use_index_cache {
            crate::fetch::CacheAction::UseCacheOnly
        } else {
            source_config.cache_action
        };

        let options = FetchRepoDataOptions {
            cache_action,
            zstd_enabled: source_config.zstd_enabled,
            bz2_enabled: source_config.bz2_enabled,
            jlap_enabled: config.jlap_enabled && source_config.jlap_enabled,
            local_repodata_ttl: config.local_repodata_ttl,
            ..FetchRepoDataOptions::default()
        };

        let file_name = options.variant.file_name().to_string();

        let cached = fetch_repo_data(
            subdir_url.clone(),
            self.gateway.client.clone(),
            self.gateway.cache.clone(),
            options,
            self.reporter.clone(),
        )
        .await
        .map_err(|err| classify_fetch_error(subdir_url, err))?;

        let cache_key = crate::fetch::cache_key_for_subdir(subdir_url, &file_name);
        let pickle_path = self.gateway.cache.join(format!("{cache_key}.q"));

        let index_options = IndexOptions {
            use_only_tar_bz2: config.use_only_tar_bz2,
            add_pip_as_python_dependency: config.add_pip_as_python_dependency,
        };

        let fingerprint = Fingerprint::current(
            subdir_url.as_str(),
            &self.channel.canonical_name(),
            config.add_pip_as_python_dependency,
            cached.cache_state.cache_headers.last_modified.as_deref(),
            cached.cache_state.cache_headers.etag.as_deref(),
            &file_name,
        );

        let index = if let Some(index) = pickle::load(&pickle_path, &fingerprint) {
            index
        } else {
            let channel = self.channel.clone();
            let platform = self.platform;
            let path = cached.repo_data_json_path.clone();
            let verifier = self.gateway.verifier.clone();
            let options = index_options.clone();

            let index = tokio::task::spawn_blocking(move || -> Result<SubdirIndex, FetchRepoDataError> {
                let bytes = fs_err::read(&path).map_err(FetchRepoDataError::IoError)?;
                SubdirIndex::parse(&bytes, &channel, platform, verifier.as_ref(), &options)
            })
            .await
            .map_err(FetchRepoDataError::from)?
            .map_err(|err| classify_fetch_error(subdir_url, err))?;

            if let Err(err) = pickle::save(&pickle_path, &fingerprint, &index) {
                tracing::warn!(%err, "failed to write pickled index sidecar");
            }

            index
        };

        Ok(SubdirData::new(index, IndexSource::Remote))
    }
}
