#![deny(missing_docs)]

//! `rattler_repodata_gateway` is a crate that provides functionality to interact with Conda
//! repodata. It downloads and caches `repodata.json` files (optionally through the JLAP
//! incremental-patch protocol or a zstd-compressed variant), indexes the parsed records in
//! memory, and exposes a [`Gateway`] that answers predicate-based queries against one or more
//! channels concurrently.
//!
//! The crate is organized around the data flow its own module docs describe: [`fetch`]
//! downloads and caches the raw repodata document, [`gateway`] indexes it and serves queries.

pub mod fetch;
pub mod gateway;

mod reporter;
mod utils;

pub use gateway::{
    AllowAll, ChannelAllowlist, ChannelConfig, Gateway, GatewayBuilder, GatewayConfig,
    GatewayError, IndexOptions, NoopVerifier, SignatureVerifier, SourceConfig, SubdirSelection,
};
pub use reporter::Reporter;
