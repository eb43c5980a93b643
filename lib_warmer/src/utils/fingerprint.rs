//! # Request Fingerprints
//!
//! Derives stable, deterministic identifiers from the semantic content of an
//! upstream request. Two requests that would hit the same upstream endpoint
//! with the same parameters always produce the same fingerprint, regardless
//! of the order their parameters were assembled in.
//!
//! Fingerprints are the primary keys of the subscription registry and the
//! routing handle carried by every event on the warming bus.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable hex-encoded identifier derived from a request's semantic content.
///
/// Callers hold on to this to address a subscription later (e.g. to stop
/// warming it). The value is an opaque lowercase hex string.
pub type Fingerprint = String;

/// # Full Fingerprint
///
/// Hashes the request identifier together with its parameter payload.
///
/// The payload is serialized in canonical form first, so JSON objects hash
/// the same no matter the insertion order of their keys. A separator byte
/// keeps `("ab", ...)` and `("a", "b...")` from colliding.
pub fn fingerprint(id: &str, data: &Value) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0x00]);
    hasher.update(canonical_json(data).as_bytes());
    hex::encode(hasher.finalize())
}

/// # Group Fingerprint
///
/// Hashes the request identifier alone, excluding the parameter payload.
///
/// All requests against the same route collapse onto one group fingerprint,
/// which is what batched (parent) subscriptions are keyed by. A distinct
/// separator byte keeps the group domain disjoint from [`fingerprint`], so a
/// group key can never collide with the full fingerprint of a payload-free
/// request.
pub fn group_fingerprint(id: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0x1f]);
    hex::encode(hasher.finalize())
}

/// Serializes a JSON value with deterministic object key order.
///
/// `serde_json` is built with its default ordered map here, so objects
/// already serialize with sorted keys; this helper just centralizes the
/// invariant.
fn canonical_json(data: &Value) -> String {
    serde_json::to_string(data).expect("JSON value serialization cannot fail")
}
