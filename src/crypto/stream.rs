//! The payload/deniability stream-cipher cascade: XChaCha20 always, with an optional
//! Serpent-CTR layer underneath in paranoid mode.
//!
//! Encrypt order is Serpent-CTR then XChaCha20 (`C = XChaCha20(ChaCha_key, nonce,
//! Serpent-CTR(serpent_key, iv, P))`); decrypt undoes XChaCha20 first, then Serpent-CTR,
//! matching §4.6. Both ciphers are stream ciphers (CTR-mode / native-CTR construction),
//! so `encrypt`/`decrypt` are the same XOR operation applied in opposite layer order.

use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use serpent::Serpent;

type SerpentCtr = Ctr128BE<Serpent>;

/// A keyed cipher cascade, rekeyable in place at the 60 GiB boundary (§4.6/§4.5).
pub struct Cascade {
    chacha_key: [u8; 32],
    chacha: XChaCha20,
    serpent_key: Option<[u8; 32]>,
    serpent: Option<SerpentCtr>,
}

impl Cascade {
    /// Builds a cascade. `serpent_key`/`serpent_iv` must both be `Some` (paranoid) or
    /// both `None` (normal mode).
    #[must_use]
    pub fn new(chacha_key: [u8; 32], chacha_nonce: [u8; 24], serpent_key: Option<[u8; 32]>, serpent_iv: Option<[u8; 16]>) -> Self {
        let chacha = XChaCha20::new((&chacha_key).into(), (&chacha_nonce).into());
        let serpent = match (serpent_key, serpent_iv) {
            (Some(key), Some(iv)) => Some(SerpentCtr::new((&key).into(), (&iv).into())),
            _ => None,
        };
        Self { chacha_key, chacha, serpent_key, serpent }
    }

    /// Re-initializes both ciphers with fresh nonces but the same keys, as required at
    /// every 60 GiB rekey boundary.
    pub fn rekey(&mut self, chacha_nonce: [u8; 24], serpent_iv: Option<[u8; 16]>) {
        self.chacha = XChaCha20::new((&self.chacha_key).into(), (&chacha_nonce).into());
        if let Some(key) = self.serpent_key {
            let iv = serpent_iv.expect("serpent IV required when paranoid mode is active");
            self.serpent = Some(SerpentCtr::new((&key).into(), (&iv).into()));
        }
    }

    /// Encrypts `data` in place: Serpent-CTR (if active), then XChaCha20.
    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        if let Some(serpent) = &mut self.serpent {
            serpent.apply_keystream(data);
        }
        self.chacha.apply_keystream(data);
    }

    /// Decrypts `data` in place: undoes XChaCha20, then Serpent-CTR (if active).
    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        self.chacha.apply_keystream(data);
        if let Some(serpent) = &mut self.serpent {
            serpent.apply_keystream(data);
        }
    }

    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.serpent_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade(paranoid: bool) -> Cascade {
        let chacha_key = [1u8; 32];
        let nonce = [2u8; 24];
        if paranoid {
            Cascade::new(chacha_key, nonce, Some([3u8; 32]), Some([4u8; 16]))
        } else {
            Cascade::new(chacha_key, nonce, None, None)
        }
    }

    #[test]
    fn round_trip_normal_mode() {
        let mut enc = cascade(false);
        let mut dec = cascade(false);
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut buf = plaintext.clone();
        enc.encrypt_in_place(&mut buf);
        assert_ne!(buf, plaintext);
        dec.decrypt_in_place(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn round_trip_paranoid_mode() {
        let mut enc = cascade(true);
        let mut dec = cascade(true);
        let plaintext = vec![0xABu8; 4096];
        let mut buf = plaintext.clone();
        enc.encrypt_in_place(&mut buf);
        assert_ne!(buf, plaintext);
        dec.decrypt_in_place(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn rekey_changes_ciphertext_for_same_plaintext() {
        let mut a = cascade(false);
        let plaintext = vec![0x11u8; 64];
        let mut first = plaintext.clone();
        a.encrypt_in_place(&mut first);

        let mut b = cascade(false);
        b.rekey([9u8; 24], None);
        let mut second = plaintext.clone();
        b.encrypt_in_place(&mut second);

        assert_ne!(first, second);
    }
}
