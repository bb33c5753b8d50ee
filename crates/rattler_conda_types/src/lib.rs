#![deny(missing_docs)]
//! `rattler-conda-types` contains the data model consumed by the repodata
//! acquisition and caching core: package records, channel identity, platform
//! identifiers, and the [`Predicate`] trait the gateway's query engine is
//! generic over. Version comparison and match-spec parsing are a separate
//! concern and are intentionally not modeled here; the gateway only ever asks
//! "does this predicate match this record", never "what does this version
//! range mean".

mod channel;
mod no_arch_type;
mod package_name;
mod platform;
mod predicate;
mod repo_data;
mod repo_data_record;
pub mod utils;

pub use channel::{Channel, ParseChannelError};
pub use no_arch_type::{NoArchKind, NoArchType};
pub use package_name::{InvalidPackageNameError, PackageName};
pub use platform::{Arch, ParseArchError, ParsePlatformError, Platform};
pub use predicate::{ExactName, ExactRecord, HasTrackFeatures, Predicate};
pub use repo_data::{compute_package_url, ChannelInfo, PackageRecord, RepoData};
pub use repo_data_record::RepoDataRecord;
