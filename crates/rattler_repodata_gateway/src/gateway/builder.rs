//! Assembles a [`Gateway`] from optional overrides, falling back to
//! sensible defaults: the system cache directory, an allow-everything
//! allowlist, a no-op signature verifier, and a client wrapped in the
//! default retry policy.

use std::sync::Arc;

use coalesced_map::CoalescedMap;
use rattler_networking::retry_policies::default_retry_policy;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::RetryTransientMiddleware;

use crate::gateway::{
    allowlist::{AllowAll, ChannelAllowlist},
    index::{NoopVerifier, SignatureVerifier},
    GatewayConfig, GatewayInner,
};
use crate::{ChannelConfig, Gateway};

/// A builder for constructing a [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    channel_config: ChannelConfig,
    config: GatewayConfig,
    client: Option<ClientWithMiddleware>,
    cache: Option<std::path::PathBuf>,
    allowlist: Option<Arc<dyn ChannelAllowlist>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl GatewayBuilder {
    /// New instance of the builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client to use for fetching repodata.
    #[must_use]
    pub fn with_client(mut self, client: ClientWithMiddleware) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the channel configuration to use for fetching repodata.
    #[must_use]
    pub fn with_channel_config(mut self, channel_config: ChannelConfig) -> Self {
        self.channel_config = channel_config;
        self
    }

    /// Set the ambient gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the directory to use for caching repodata.
    #[must_use]
    pub fn with_cache_dir(mut self, cache: impl Into<std::path::PathBuf>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    /// Set the collaborator that decides whether a channel may be queried at
    /// all. Defaults to [`AllowAll`].
    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Arc<dyn ChannelAllowlist>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    /// Set the collaborator that verifies individual repodata entries.
    /// Defaults to [`NoopVerifier`].
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Finish the construction of the gateway, returning a constructed
    /// [`Gateway`].
    pub fn finish(self) -> Gateway {
        let client = self.client.unwrap_or_else(|| {
            let client = Client::builder()
                .connect_timeout(self.config.remote_connect_timeout)
                .timeout(self.config.remote_read_timeout)
                .build()
                .unwrap_or_else(|_| Client::new());
            ClientBuilder::new(client)
                .with(RetryTransientMiddleware::new_with_policy(
                    default_retry_policy(),
                ))
                .build()
        });

        let cache = self.cache.unwrap_or_else(|| {
            rattler_cache::default_cache_dir()
                .map(|dir| dir.join(rattler_cache::REPODATA_CACHE_DIR))
                .unwrap_or_else(|_| std::path::PathBuf::from("."))
        });

        Gateway {
            inner: Arc::new(GatewayInner {
                subdirs: CoalescedMap::new(),
                client,
                channel_config: self.channel_config,
                config: self.config,
                cache,
                allowlist: self.allowlist.unwrap_or_else(|| Arc::new(AllowAll)),
                verifier: self.verifier.unwrap_or_else(|| Arc::new(NoopVerifier)),
            }),
        }
    }
}
