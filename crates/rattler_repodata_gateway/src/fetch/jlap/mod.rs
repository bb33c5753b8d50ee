//! JLAP: an append-only, signed line-stream of JSON-Patch records that lets
//! the acquisition orchestrator update a cached `repodata.json` without
//! re-downloading the whole file.
//!
//! This module only concerns itself with the wire protocol: requesting the
//! (possibly range-restricted) JLAP bytes, parsing them into a verified
//! [`buffer::JlapBuffer`] ([`buffer`]), and planning/applying the patch
//! chain ([`plan`]). The revalidate/full-fetch/recovery state machine that
//! drives these pieces lives in [`crate::fetch::with_cache`].
//!
//! For background on the file format, see the JLAP CEP:
//! <https://github.com/conda-incubator/ceps/pull/20/files>

pub mod buffer;
pub mod plan;

pub use buffer::{JlapBuffer, JlapError, JlapFooter, JlapHash, PatchRecord};

use reqwest::{header::HeaderValue, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

/// The default name of the JLAP file alongside `repodata.json`.
pub const JLAP_FILE_NAME: &str = "repodata.jlap";

/// The outcome of requesting a (possibly range-restricted) JLAP stream.
#[derive(Debug)]
pub enum JlapRangeResponse {
    /// The server reported `304 Not Modified`: our cached copy (if any) is
    /// already current.
    NotModified,

    /// The server reported a status outside `{200, 206, 304, 404, 416}`, or
    /// `404`/`416`: JLAP is not available (or the requested range is no
    /// longer valid). The caller should fall back to zst/plain full fetch.
    Unavailable,

    /// The server returned the (partial or complete) JLAP body.
    Body {
        /// The raw response bytes.
        bytes: bytes::Bytes,
        /// `true` if the server honored the range request (206); `false` if
        /// it ignored it and sent the whole file from byte 0 (200).
        is_partial: bool,
    },
}

/// Requests the JLAP stream for `subdir_url`, resuming from `pos` when it is
/// non-zero.
///
/// Per spec, responses with a status outside `{206, 304, 404, 416}` when a
/// range was requested are themselves treated as protocol errors (surfaced
/// as [`JlapError`] via the HTTP error path, not as [`JlapRangeResponse`]).
pub async fn fetch_range(
    client: &ClientWithMiddleware,
    subdir_url: &Url,
    pos: u64,
) -> Result<JlapRangeResponse, reqwest_middleware::Error> {
    let jlap_url = subdir_url
        .join(JLAP_FILE_NAME)
        .expect("joining a file name onto a subdir url cannot fail");

    let mut request = client.get(jlap_url);
    if pos > 0 {
        request = request.header(
            reqwest::header::RANGE,
            HeaderValue::from_str(&format!("bytes={pos}-"))
                .expect("a numeric range header is always a valid header value"),
        );
    }

    let response = request.send().await?;
    match response.status() {
        StatusCode::NOT_MODIFIED => Ok(JlapRangeResponse::NotModified),
        StatusCode::NOT_FOUND | StatusCode::RANGE_NOT_SATISFIABLE => {
            Ok(JlapRangeResponse::Unavailable)
        }
        StatusCode::PARTIAL_CONTENT => {
            let bytes = response.bytes().await.map_err(reqwest_middleware::Error::from)?;
            Ok(JlapRangeResponse::Body {
                bytes,
                is_partial: true,
            })
        }
        StatusCode::OK => {
            let bytes = response.bytes().await.map_err(reqwest_middleware::Error::from)?;
            Ok(JlapRangeResponse::Body {
                bytes,
                is_partial: false,
            })
        }
        other => {
            tracing::warn!(status = %other, "unexpected jlap response status, treating as unavailable");
            Ok(JlapRangeResponse::Unavailable)
        }
    }
}
