//! Parses the append-only, newline-delimited JLAP line-stream into its
//! constituent patch records, verifying the rolling blake2b hash chain that
//! links every line to the one before it.
//!
//! Layout of a full JLAP file:
//!
//! ```text
//! <iv>\n
//! <patch line>\n
//! <patch line>\n
//! ...
//! <footer line>\n
//! <checksum line>\n
//! ```
//!
//! The hash of line *i* is `blake2b(hash(i-1) || line_i_bytes)`. The parser
//! is resumable: a caller who already validated bytes `[0, pos)` can hand us
//! the running hash at `pos` (the saved `iv` in `.state.json`) and the bytes
//! from `pos` onward, and the chain continues without re-reading history.

use rattler_digest::Blake2b256;
use serde::Deserialize;
use std::str;

/// 32-byte rolling hash, hex-encoded on the wire.
pub type JlapHash = [u8; 32];

/// A single record in the JLAP patch list.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchRecord {
    /// The hash of the repodata this patch applies to.
    pub from: String,
    /// The hash of the repodata produced by applying this patch.
    pub to: String,
    /// The JSON-Patch (RFC 6902) operations themselves.
    pub patch: json_patch::Patch,
}

/// The penultimate line of a JLAP stream: names the hash of the latest
/// repodata the stream can reach.
#[derive(Debug, Clone, Deserialize)]
pub struct JlapFooter {
    /// The file this JLAP stream describes, e.g. `repodata.json`.
    #[serde(default)]
    pub url: String,
    /// Hex-encoded blake2b hash of the canonical latest repodata.
    pub latest: String,
}

/// Errors produced while parsing a JLAP buffer.
#[derive(Debug, thiserror::Error)]
pub enum JlapError {
    /// The stream did not have the minimum number of lines a valid JLAP
    /// stream requires (iv/seed, footer, checksum).
    #[error("jlap stream is malformed: {0}")]
    Malformed(&'static str),

    /// A hash (iv or checksum) line was not valid hex, or not 32 bytes.
    #[error("invalid hash in jlap stream: {0}")]
    InvalidHash(#[from] hex::FromHexError),

    /// A line was not valid UTF-8.
    #[error(transparent)]
    InvalidUtf8(#[from] str::Utf8Error),

    /// A patch or footer line was not valid JSON.
    #[error(transparent)]
    InvalidJson(#[from] serde_json::Error),

    /// The trailing checksum line did not match the computed rolling hash
    /// through the footer line.
    #[error("jlap checksum does not match the computed hash chain")]
    ChecksumMismatch,

    /// The patch planner could not find a chain of patches from `have` to
    /// `want`.
    #[error("no chain of patches leads from the cached hash to the latest hash")]
    PatchNotFound,

    /// Applying a JSON Patch operation failed.
    #[error(transparent)]
    Apply(#[from] json_patch::PatchError),
}

/// Computes `blake2b(prev || line)`, the rolling-hash step used to link
/// every line in a JLAP stream to the one before it.
pub fn hash_line(prev: &JlapHash, line: &[u8]) -> JlapHash {
    use blake2::Digest;
    let mut hasher = Blake2b256::new();
    hasher.update(prev);
    hasher.update(line);
    hasher.finalize().into()
}

/// Incrementally folds lines into the rolling hash chain. Resumable: feeding
/// lines `[a, b]` to a fresh hasher produces the same `.current()` as
/// feeding `[a]`, reading back `.current()`, constructing a new hasher seeded
/// with it, and feeding `[b]` (see property P4).
#[derive(Debug, Clone, Copy)]
pub struct LineHasher {
    current: JlapHash,
}

impl LineHasher {
    /// Starts a new hash chain seeded with `seed` (the stream's `iv` for a
    /// cold parse, or a previously saved running hash when resuming).
    pub fn new(seed: JlapHash) -> Self {
        Self { current: seed }
    }

    /// Folds one line into the chain and returns the updated running hash.
    pub fn feed(&mut self, line: &[u8]) -> JlapHash {
        self.current = hash_line(&self.current, line);
        self.current
    }

    /// The running hash after the most recently fed line (or the seed, if
    /// nothing has been fed yet).
    pub fn current(&self) -> JlapHash {
        self.current
    }
}

pub(crate) fn hash_to_hex(hash: &JlapHash) -> String {
    hex::encode(hash)
}

pub(crate) fn hex_to_hash(s: &str) -> Result<JlapHash, JlapError> {
    let s = s.trim();
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

/// Splits `body` on `\n`, returning each line without its trailing newline.
/// A single trailing empty segment (produced when `body` itself ends with
/// `\n`) is dropped; an empty `body` yields no lines.
fn split_lines(body: &[u8]) -> Vec<&[u8]> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// The parsed, hash-verified contents of a JLAP response.
#[derive(Debug, Clone)]
pub struct JlapBuffer {
    /// The initialization vector this buffer's chain was seeded with. `None`
    /// when this buffer was parsed from a resumed (range) request, since the
    /// IV line is only ever sent once, at the start of the file.
    pub iv: Option<JlapHash>,

    /// The patch records found between the iv/seed and the footer.
    pub patches: Vec<PatchRecord>,

    /// The footer naming the latest reachable hash.
    pub footer: JlapFooter,

    /// The running hash through the footer line. Equal to the verified
    /// trailing checksum.
    pub footer_hash: JlapHash,

    /// Number of bytes of the input this buffer was built from; callers
    /// resuming a fetch add this to the previous position to get the next
    /// `Range: bytes=<pos>-` start.
    pub consumed: u64,

    /// Number of bytes consumed up through (and including) the last patch
    /// line, not counting the footer/checksum trailer. The server rewrites
    /// the footer and checksum on every append, so the next resumed fetch
    /// must start here, not at `consumed`.
    pub content_end: u64,

    /// The running hash at `content_end`. Seeds [`JlapBuffer::parse_resumed`]
    /// for the next incremental fetch.
    pub seed_at_content_end: JlapHash,
}

impl JlapBuffer {
    /// Builds the zero-patch buffer used right after a full (non-JLAP) fetch
    /// so the rest of the pipeline can update `.state.json` without a
    /// separate code path: there is nothing to patch, and the footer simply
    /// names the hash we already know we have on disk.
    pub fn synthetic(hash: JlapHash) -> Self {
        Self {
            iv: Some(hash),
            patches: Vec::new(),
            footer: JlapFooter {
                url: super::JLAP_FILE_NAME.to_string(),
                latest: hash_to_hex(&hash),
            },
            footer_hash: hash,
            consumed: 0,
            content_end: 0,
            seed_at_content_end: hash,
        }
    }

    /// Parses a from-scratch JLAP response: the first line is the iv.
    pub fn parse_cold(body: &[u8]) -> Result<Self, JlapError> {
        let lines = split_lines(body);
        if lines.len() < 3 {
            return Err(JlapError::Malformed(
                "a cold jlap stream needs at least an iv, footer and checksum line",
            ));
        }
        let iv = hex_to_hash(str::from_utf8(lines[0])?)?;
        let mut buffer = Self::parse_lines(&lines[1..], iv)?;
        buffer.iv = Some(iv);
        buffer.consumed = body.len() as u64;
        buffer.content_end += lines[0].len() as u64 + 1;
        Ok(buffer)
    }

    /// Parses a resumed (range-fetched) JLAP response: no iv line, the chain
    /// continues from `seed` (the running hash saved at the prior `pos`).
    pub fn parse_resumed(body: &[u8], seed: JlapHash) -> Result<Self, JlapError> {
        let lines = split_lines(body);
        let mut buffer = Self::parse_lines(&lines, seed)?;
        buffer.iv = None;
        buffer.consumed = body.len() as u64;
        Ok(buffer)
    }

    fn parse_lines(lines: &[&[u8]], seed: JlapHash) -> Result<Self, JlapError> {
        if lines.len() < 2 {
            return Err(JlapError::Malformed(
                "jlap stream is missing its footer and checksum lines",
            ));
        }
        let (content_lines, tail) = lines.split_at(lines.len() - 2);
        let footer_line = tail[0];
        let checksum_line = tail[1];

        let mut hasher = LineHasher::new(seed);
        let mut patches = Vec::with_capacity(content_lines.len());
        let mut content_end = 0u64;
        for line in content_lines {
            hasher.feed(line);
            content_end += line.len() as u64 + 1;
            patches.push(serde_json::from_slice(line)?);
        }
        let seed_at_content_end = hasher.current();

        let footer_hash = hasher.feed(footer_line);
        let footer: JlapFooter = serde_json::from_slice(footer_line)?;

        let expected = hex_to_hash(str::from_utf8(checksum_line)?)?;
        if expected != footer_hash {
            return Err(JlapError::ChecksumMismatch);
        }

        Ok(Self {
            iv: None,
            patches,
            footer,
            footer_hash,
            consumed: 0,
            content_end,
            seed_at_content_end,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn patch_line(from: &str, to: &str) -> String {
        format!(r#"{{"from":"{from}","to":"{to}","patch":[]}}"#)
    }

    /// Builds a complete, valid JLAP byte stream for the given patch lines,
    /// returning the bytes and the hash chain's terminal (checksum) value.
    fn build_stream(iv: JlapHash, patch_lines: &[String], latest_hex: &str) -> (Vec<u8>, JlapHash) {
        let mut hasher = LineHasher::new(iv);
        let mut out = Vec::new();
        out.extend_from_slice(hash_to_hex(&iv).as_bytes());
        out.push(b'\n');
        for line in patch_lines {
            hasher.feed(line.as_bytes());
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        let footer = format!(r#"{{"url":"repodata.json","latest":"{latest_hex}"}}"#);
        let footer_hash = hasher.feed(footer.as_bytes());
        out.extend_from_slice(footer.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(hash_to_hex(&footer_hash).as_bytes());
        out.push(b'\n');
        (out, footer_hash)
    }

    #[test]
    fn parses_a_cold_stream_with_one_patch() {
        let iv = [0u8; 32];
        let lines = vec![patch_line("h0", "h1")];
        let (bytes, _checksum) = build_stream(iv, &lines, "h1");

        let buffer = JlapBuffer::parse_cold(&bytes).unwrap();
        assert_eq!(buffer.iv, Some(iv));
        assert_eq!(buffer.patches.len(), 1);
        assert_eq!(buffer.footer.latest, "h1");
        assert_eq!(buffer.consumed, bytes.len() as u64);
    }

    #[test]
    fn rejects_a_tampered_checksum() {
        let iv = [0u8; 32];
        let lines = vec![patch_line("h0", "h1")];
        let (mut bytes, _) = build_stream(iv, &lines, "h1");
        // Flip the last hex character of the checksum line.
        let last_nl = bytes.iter().rposition(|&b| b == b'\n').unwrap();
        let second_last_nl = bytes[..last_nl].iter().rposition(|&b| b == b'\n').unwrap();
        let tamper_at = second_last_nl + 1;
        bytes[tamper_at] = if bytes[tamper_at] == b'0' { b'1' } else { b'0' };

        let err = JlapBuffer::parse_cold(&bytes).unwrap_err();
        assert!(matches!(err, JlapError::ChecksumMismatch));
    }

    /// P4: splitting a valid stream at any line boundary and resuming
    /// hashing from the saved running hash yields the same terminal hash as
    /// hashing the whole stream at once.
    #[test]
    fn line_hasher_is_resumable_at_any_line_boundary() {
        let iv = [7u8; 32];
        let lines: Vec<&[u8]> = vec![b"line-a", b"line-b", b"line-c", b"line-d"];

        let mut whole = LineHasher::new(iv);
        for line in &lines {
            whole.feed(line);
        }
        let expected = whole.current();

        for split_at in 0..lines.len() {
            let mut first_half = LineHasher::new(iv);
            for line in &lines[..split_at] {
                first_half.feed(line);
            }
            let mut resumed = LineHasher::new(first_half.current());
            for line in &lines[split_at..] {
                resumed.feed(line);
            }
            assert_eq!(resumed.current(), expected, "split at {split_at} diverged");
        }
    }

    #[test]
    fn synthetic_buffer_has_no_patches_and_names_the_given_hash() {
        let hash = [3u8; 32];
        let buffer = JlapBuffer::synthetic(hash);
        assert!(buffer.patches.is_empty());
        assert_eq!(buffer.footer.latest, hash_to_hex(&hash));
        assert_eq!(buffer.footer_hash, hash);
    }
}
