//! The allowlist collaborator consulted by `query_all` before a channel is
//! ever fanned out to. Deciding *what* is allowed is out of scope for this
//! crate; this only defines the seam.

use rattler_conda_types::Channel;

/// Decides whether a channel may be queried at all.
pub trait ChannelAllowlist: Send + Sync {
    /// Returns `true` if `channel` may be fetched.
    fn is_allowed(&self, channel: &Channel) -> bool;
}

/// The default allowlist: every channel is allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ChannelAllowlist for AllowAll {
    fn is_allowed(&self, _channel: &Channel) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use url::Url;

    #[test]
    fn allow_all_allows_everything() {
        let channel = Channel::from_url(Url::parse("https://conda.anaconda.org/conda-forge").unwrap());
        assert!(AllowAll.is_allowed(&channel));
    }
}
