//! Cache keys that decide whether an operation's previous output can be reused.

use sha2::{Digest as _, Sha256};
use strata_fingerprint::ChangeFingerprint;

/// Compute the cache key of an operation.
///
/// The key covers the phase name, every `(path, hash)` entry of the project's
/// fingerprint in path order, and the keys of the operation's dependencies in
/// the order given. Without a project fingerprint, or when any dependency has
/// no key, there is no key and the operation must run.
pub fn cache_key(
    phase: &str,
    fingerprint: Option<&ChangeFingerprint>,
    dependency_keys: &[Option<&str>],
) -> Option<String> {
    let fingerprint = fingerprint?;
    let mut hasher = Sha256::new();
    hasher.update(b"phase\0");
    hasher.update(phase.as_bytes());
    hasher.update(b"\0files\0");
    for (path, hash) in fingerprint {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"dependencies\0");
    for key in dependency_keys {
        hasher.update((*key)?.as_bytes());
        hasher.update(b"\0");
    }
    Some(hex::encode(hasher.finalize()))
}
