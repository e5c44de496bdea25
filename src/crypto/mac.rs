//! # Header and Payload Authentication
//!
//! The two MAC constructions used on-disk: the header MAC (always HMAC-SHA3-512 over
//! the ordered header fields) and the payload MAC (keyed BLAKE2b-512 by default,
//! HMAC-SHA3-512 in paranoid mode, over the ciphertext stream).
//!
//! ## Security Properties
//!
//! - **Integrity**: any bit flipped in an authenticated field or frame changes the tag.
//! - **Authenticity**: the tag can only be produced by someone holding the matching
//!   subkey, which is itself derived from the password.
//! - **Constant-time verification**: both MACs are compared with [`ct_eq`], so a
//!   mismatching tag never leaks which byte differed through timing.
//!
//! ## Construction Choice
//!
//! The payload MAC defaults to BLAKE2b-512 (faster than HMAC-SHA3 on most hardware);
//! paranoid mode swaps to HMAC-SHA3-512 for a second, independently-designed primitive
//! alongside the paranoid cipher cascade.

use blake2::Blake2bMac512;
use blake2::digest::Mac as Blake2Mac;
use hmac::{Hmac, Mac as HmacMac};
use sha3::Sha3_512;

use crate::crypto::hash::ct_eq;

type HmacSha3_512 = Hmac<Sha3_512>;

/// HMAC-SHA3-512 over the ordered header fields (§4.7). Produces/verifies the 64-byte
/// digest stored RS(64,192)-encoded in the `keyHash` slot.
pub struct HeaderMac {
    mac: HmacSha3_512,
}

impl HeaderMac {
    /// Opens a fresh HMAC-SHA3-512 instance keyed on the header subkey. HMAC accepts any
    /// key length, so this never fails.
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self { mac: HmacSha3_512::new_from_slice(key).expect("HMAC accepts any key length") }
    }

    /// Feeds one more field into the running digest, in the order the header lays its
    /// fields out on disk — field order is part of what gets authenticated.
    pub fn update(&mut self, part: &[u8]) {
        HmacMac::update(&mut self.mac, part);
    }

    #[must_use]
    pub fn finalize(self) -> [u8; 64] {
        self.mac.finalize().into_bytes().into()
    }

    /// Computes the MAC over `parts` concatenated in order, in one call.
    #[must_use]
    pub fn compute(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
        let mut mac = Self::new(key);
        for part in parts {
            mac.update(part);
        }
        mac.finalize()
    }

    /// Constant-time verification against an expected digest. Never short-circuits on
    /// the first differing byte, so a forged header can't be narrowed down by timing.
    #[must_use]
    pub fn verify(key: &[u8], parts: &[&[u8]], expected: &[u8; 64]) -> bool {
        ct_eq(&Self::compute(key, parts), expected)
    }
}

/// The payload authentication tag, selected by the header's paranoid flag (§4.6).
pub enum PayloadMac {
    Blake2b512(Blake2bMac512),
    HmacSha3_512(HmacSha3_512),
}

impl PayloadMac {
    /// Selects the construction by `paranoid`: HMAC-SHA3-512 when set, BLAKE2b-512
    /// otherwise. `key` must already be sized for the chosen construction (64 bytes for
    /// HMAC, at most 64 for BLAKE2b) — the subkey stream guarantees this.
    #[must_use]
    pub fn new(paranoid: bool, key: &[u8]) -> Self {
        if paranoid {
            Self::HmacSha3_512(HmacSha3_512::new_from_slice(key).expect("HMAC accepts any key length"))
        } else {
            Self::Blake2b512(Blake2bMac512::new_from_slice(key).expect("BLAKE2b-512 key must be <= 64 bytes"))
        }
    }

    /// Feeds one more ciphertext frame into the running digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake2b512(mac) => Blake2Mac::update(mac, data),
            Self::HmacSha3_512(mac) => HmacMac::update(mac, data),
        }
    }

    #[must_use]
    pub fn finalize(self) -> [u8; 64] {
        match self {
            Self::Blake2b512(mac) => mac.finalize().into_bytes().into(),
            Self::HmacSha3_512(mac) => mac.finalize().into_bytes().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_mac_compute_matches_verify() {
        let key = [1u8; 64];
        let parts: &[&[u8]] = &[b"v2.00", b"00000", b"flags"];
        let tag = HeaderMac::compute(&key, parts);
        assert!(HeaderMac::verify(&key, parts, &tag));
    }

    #[test]
    fn header_mac_rejects_tampered_field() {
        let key = [1u8; 64];
        let tag = HeaderMac::compute(&key, &[b"v2.00", b"00000"]);
        assert!(!HeaderMac::verify(&key, &[b"v2.00", b"00001"], &tag));
    }

    #[test]
    fn payload_mac_variants_diverge_on_same_input() {
        let key = [5u8; 32];
        let mut blake = PayloadMac::new(false, &key);
        blake.update(b"ciphertext");
        let mut hmac = PayloadMac::new(true, &key);
        hmac.update(b"ciphertext");
        assert_ne!(blake.finalize(), hmac.finalize());
    }
}
