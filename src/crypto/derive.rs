//! # Key Derivation
//!
//! Argon2id master-key derivation and the HKDF-SHA3-256 subkey stream that expands it
//! into every per-purpose key the header and payload codecs need.
//!
//! ## Security Properties
//!
//! - **Memory-hard**: Argon2id at 1 GiB resists GPU/ASIC acceleration on the password.
//! - **Domain-separated**: every subkey is drawn from one HKDF stream at a fixed offset,
//!   so header keys, payload keys and rekey material never collide or get reused.
//! - **Fail-closed**: a derivation or expansion that would hand back all-zero or
//!   exhausted output is treated as a broken platform, not a recoverable error.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use sha3::Sha3_256;

use crate::config::{ARGON_MEMORY_KIB, ARGON_PARALLELISM_NORMAL, ARGON_PARALLELISM_PARANOID, ARGON_TIME_NORMAL, ARGON_TIME_PARANOID, MASTER_KEY_LEN};
use crate::crypto::hash::guard_nonzero;
use crate::error::fatal;

/// Derives the 32-byte master key: `Argon2id(password, salt, t, m=1GiB, p, out=32)`.
///
/// # Parameters
/// * `password` - the user-supplied password, already XORed with any keyfile material.
/// * `salt` - the volume's random Argon2 salt, stored in the header.
/// * `paranoid` - doubles both the time and parallelism cost (§ config for the exact
///   normal/paranoid constants).
///
/// # Errors
/// None returned: invalid parameters, a hashing failure, or an all-zero result are all
/// platform-level faults and abort the process via [`crate::error::fatal`] rather than
/// surfacing as a recoverable `Result`.
///
/// # Performance
/// Dominated by the configured Argon2 memory/time/parallelism cost, not by input size —
/// this is deliberately slow, on the order of a second or more per call.
#[must_use]
pub fn derive_master_key(password: &[u8], salt: &[u8; crate::config::ARGON_SALT_LEN], paranoid: bool) -> [u8; MASTER_KEY_LEN] {
    let time = if paranoid { ARGON_TIME_PARANOID } else { ARGON_TIME_NORMAL };
    let parallelism = if paranoid { ARGON_PARALLELISM_PARANOID } else { ARGON_PARALLELISM_NORMAL };

    let params = Params::new(ARGON_MEMORY_KIB, time, parallelism, Some(MASTER_KEY_LEN)).unwrap_or_else(|e| fatal(&format!("invalid Argon2 parameters: {e:?}")));
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; MASTER_KEY_LEN];
    argon2.hash_password_into(password, salt, &mut key).unwrap_or_else(|e| fatal(&format!("Argon2id derivation failed: {e:?}")));
    guard_nonzero(&key, "Argon2id master key");
    key
}

/// A cursor over the single logical HKDF-SHA3-256(ikm = masterKey, salt = hkdfSalt, info
/// = ∅) output stream. `Hkdf::expand` is prefix-stable for a fixed `(prk, info)` pair —
/// requesting a longer output reproduces every byte already handed out plus the new
/// suffix — so each `next` call simply re-expands to `position + n` bytes and returns
/// the new tail, advancing `position`.
///
/// RFC 5869 caps a single HKDF-SHA3-256 expansion at `255 * 32 = 8160` bytes; after the
/// fixed 128-byte subkey prefix that leaves room for roughly 200 rekey draws (40 bytes
/// each), i.e. about 12 TiB of payload at the 60 GiB rekey boundary. Exceeding it is a
/// fatal condition rather than a silently truncated keystream.
pub struct SubkeyStream {
    hkdf: Hkdf<Sha3_256>,
    position: usize,
}

impl SubkeyStream {
    /// Opens the stream at `HKDF-Extract(salt = hkdf_salt, ikm = master_key)`. Every
    /// subkey for a volume comes from the same stream instance, drawn in a fixed order,
    /// so the caller's draw sequence *is* the domain separation.
    #[must_use]
    pub fn new(master_key: &[u8], hkdf_salt: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha3_256>::new(Some(hkdf_salt), master_key);
        Self { hkdf, position: 0 }
    }

    /// Returns the next `n` bytes of the stream, guarded against the all-zero form.
    ///
    /// # Errors
    /// None returned: exhausting the RFC 5869 output cap is fatal, not recoverable
    /// (`what` is folded into the panic message so the failing draw is identifiable).
    pub fn next(&mut self, n: usize, what: &str) -> Vec<u8> {
        let total = self.position + n;
        let mut buf = vec![0u8; total];
        self.hkdf.expand(&[], &mut buf).unwrap_or_else(|e| fatal(&format!("HKDF expansion exhausted deriving {what}: {e}")));
        let tail = buf[self.position..].to_vec();
        self.position = total;
        guard_nonzero(&tail, what);
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_key_derivation_is_deterministic() {
        let salt = [7u8; crate::config::ARGON_SALT_LEN];
        let a = derive_master_key(b"hunter2", &salt, false);
        let b = derive_master_key(b"hunter2", &salt, false);
        assert_eq!(a, b);
    }

    #[test]
    fn paranoid_and_normal_derivations_differ() {
        let salt = [7u8; crate::config::ARGON_SALT_LEN];
        let normal = derive_master_key(b"hunter2", &salt, false);
        let paranoid = derive_master_key(b"hunter2", &salt, true);
        assert_ne!(normal, paranoid);
    }

    #[test]
    fn subkey_stream_prefix_is_stable_across_draw_sizes() {
        let key = [1u8; 32];
        let salt = [2u8; 32];

        let mut a = SubkeyStream::new(&key, &salt);
        let first_32 = a.next(32, "first");

        let mut b = SubkeyStream::new(&key, &salt);
        let first_64 = b.next(64, "first-64");

        assert_eq!(first_32.as_slice(), &first_64[..32]);
    }

    #[test]
    fn successive_draws_are_disjoint_and_ordered() {
        let key = [9u8; 32];
        let salt = [3u8; 32];
        let mut s = SubkeyStream::new(&key, &salt);
        let header = s.next(64, "header");
        let payload = s.next(32, "payload");
        let serpent = s.next(32, "serpent");
        assert_eq!(header.len(), 64);
        assert_eq!(payload.len(), 32);
        assert_eq!(serpent.len(), 32);
        assert_ne!(header, vec![0u8; 64]);
        assert_ne!(payload, serpent);
    }
}
