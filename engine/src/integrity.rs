//! Row-set integrity fingerprint.
//!
//! Used to verify that a bulk initial load converged: both sides hash their
//! id sets and compare. A mismatch is reported, never merged.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Stable fingerprint over a set of row ids: sort, concatenate, hash.
/// Insensitive to input order, sensitive to every id.
pub fn fingerprint<S: AsRef<str>>(ids: &[S]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hex_digest(hasher)
}

/// Compare two row sets by fingerprint.
pub fn verify_converged<S: AsRef<str>, T: AsRef<str>>(local: &[S], remote: &[T]) -> Result<()> {
    let local_fingerprint = fingerprint(local);
    let remote_fingerprint = fingerprint(remote);
    if local_fingerprint == remote_fingerprint {
        Ok(())
    } else {
        Err(Error::IntegrityMismatch {
            local_fingerprint,
            remote_fingerprint,
            local_count: local.len(),
            remote_count: remote.len(),
        })
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
