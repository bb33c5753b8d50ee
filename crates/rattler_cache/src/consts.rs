/// The location in the main cache folder where the conda package cache is stored.
pub const PACKAGE_CACHE_DIR: &str = "pkgs";
/// The location in the main cache folder where the repodata cache is stored.
pub const REPODATA_CACHE_DIR: &str = "repodata";
