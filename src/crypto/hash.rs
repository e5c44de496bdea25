//! # Hashing and Constant-Time Guards
//!
//! SHA3 hashing and the constant-time comparison / all-zero guards used everywhere a
//! cryptographic value is compared or freshly generated: the header MAC, keyfile hash,
//! payload authentication tag, and every freshly drawn salt/IV/nonce/key.
//!
//! ## Security Properties
//!
//! - **Collision resistance**: SHA3-256/512 are used for keyfile hashing and any
//!   non-keyed digest, never for authentication (which uses the keyed MACs in
//!   [`crate::crypto::mac`]).
//! - **Timing safety**: [`ct_eq`] and [`is_all_zero`] never branch on secret byte
//!   values, so neither leaks the position of a mismatch or the first non-zero byte.

use subtle::ConstantTimeEq;

use crate::error::fatal;

/// SHA3-256 of `data`. Used for keyfile content hashing, not for any authenticated
/// field (those go through the keyed MACs).
#[must_use]
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Sha3_256};
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-512 of `data`. Used for the legacy (v1-compatible) header digest path.
#[must_use]
pub fn sha3_512(data: &[u8]) -> [u8; 64] {
    use sha3::{Digest, Sha3_512};
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Constant-time equality for two equal-length byte slices. Never short-circuits on the
/// first mismatching byte: used for the header MAC, keyfile hash, and payload
/// authentication tag comparisons, anywhere a timing side-channel could narrow down a
/// forged value byte by byte.
///
/// # Returns
/// `false` immediately on a length mismatch (length is not treated as secret); otherwise
/// a constant-time comparison over the full slice.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

/// Whether `bytes` is entirely zero, checked across the whole slice rather than
/// short-circuiting on the first non-zero byte found.
#[must_use]
pub fn is_all_zero(bytes: &[u8]) -> bool {
    let mut acc = 0u8;
    for &b in bytes {
        acc |= b;
    }
    acc == 0
}

/// Guards a freshly generated cryptographic value against the all-zero form: salts,
/// HKDF salts, IVs, nonces, and derived keys are all checked here immediately after
/// generation. An all-zero value this deep in the pipeline indicates a broken RNG or
/// KDF, not a value worth silently retrying or discarding.
///
/// # Panics
/// Always, via [`crate::error::fatal`], if `bytes` is all-zero. `what` identifies which
/// value failed in the panic message.
pub fn guard_nonzero(bytes: &[u8], what: &str) {
    if is_all_zero(bytes) {
        fatal(&format!("{what} was all-zero"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_256_is_deterministic_and_sized() {
        let a = sha3_256(b"picocrypt");
        let b = sha3_256(b"picocrypt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn ct_eq_rejects_length_mismatch_and_content_mismatch() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }

    #[test]
    fn all_zero_detection() {
        assert!(is_all_zero(&[0u8; 16]));
        assert!(!is_all_zero(&[0, 0, 1, 0]));
    }

    #[test]
    #[should_panic(expected = "fatal cryptographic failure")]
    fn guard_nonzero_panics_on_all_zero() {
        guard_nonzero(&[0u8; 32], "test salt");
    }
}
