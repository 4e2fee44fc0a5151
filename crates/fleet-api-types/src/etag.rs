//! ETag computation: a strong hash over a resource's writable state,
//! required for optimistic concurrency on PUT/PATCH (spec §3, §6, §8).

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Computes the ETag for any serializable writable-state view.
///
/// The caller is responsible for constructing a value that contains exactly
/// the writable fields (config, description, and child structures) and
/// nothing else — e.g. not the database identifier or usage set, which
/// would make the ETag unstable across reads that shouldn't invalidate a
/// client's cached copy.
pub fn compute<T: Serialize>(writable_state: &T) -> String {
    // `serde_json` produces a deterministic key order for `BTreeMap`-backed
    // structs, which is what every writable-state view in this crate uses,
    // so the hash is stable across processes and releases.
    let bytes = serde_json::to_vec(writable_state).expect("writable state is always serializable");
    let digest = Sha256::digest(&bytes);
    format!("\"{}\"", hex::encode(digest))
}

/// Parses a client-supplied `If-Match` header value, stripping the
/// surrounding quotes `compute` adds.
pub fn normalize(if_match: &str) -> &str {
    if_match.trim_matches('"')
}
