#![deny(missing_docs)]

//! Retry-policy helpers for the HTTP client the repodata gateway fetches through.
//!
//! Credential attachment and channel URL construction are handled by an
//! external collaborator; this crate only supplies a sensible default retry
//! policy for `reqwest_middleware`.

pub mod retry_policies;
