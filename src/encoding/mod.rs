//! The systematic Reed-Solomon codec over GF(256), instantiated at exactly the seven
//! fixed shapes the volume format uses (§3, §4.4) and no others.
//!
//! `reed-solomon` (not an erasure-coding crate) is used because the header and payload
//! both need genuine error correction at *unknown* positions: for a `(k, n = 3k)` shape,
//! `ecc_len = 2k`, and the decoder can locate and correct up to `ecc_len / 2 = k` symbol
//! errors without being told where they are — exactly the bound §4.4 states. All shapes
//! are well under the GF(256) codeword limit of 255 bytes.

use reed_solomon::{Decoder, Encoder};

/// One of the seven fixed `(k, n)` shapes the format uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Shape {
    /// Single comment bytes: RS(1,3).
    Comment,
    /// Version string and `%05d` comment length: RS(5,15).
    Field5,
    /// Argon2id salt and Serpent IV: RS(16,48).
    Field16,
    /// XChaCha20 nonce: RS(24,72).
    Field24,
    /// HKDF salt and keyfile hash: RS(32,96).
    Field32,
    /// Header MAC and payload tag: RS(64,192).
    Field64,
    /// Payload unit: RS(128,136).
    Payload,
}

impl Shape {
    #[must_use]
    pub const fn k(self) -> usize {
        match self {
            Self::Comment => 1,
            Self::Field5 => 5,
            Self::Field16 => 16,
            Self::Field24 => 24,
            Self::Field32 => 32,
            Self::Field64 => 64,
            Self::Payload => 128,
        }
    }

    #[must_use]
    pub const fn n(self) -> usize {
        match self {
            Self::Payload => 136,
            other => other.k() * 3,
        }
    }

    #[must_use]
    pub const fn ecc_len(self) -> usize {
        self.n() - self.k()
    }

    /// Number of arbitrary-position byte errors a decoded codeword of this shape
    /// tolerates.
    #[must_use]
    pub const fn correctable_errors(self) -> usize {
        self.ecc_len() / 2
    }
}

/// Result of a decode that failed full correction: carries the codec's best-effort
/// fallback bytes per §4.4 ("decode(rs, bytes) returns original k bytes if recoverable,
/// else an error **and** a best-effort fallback").
#[derive(Debug)]
pub struct Uncorrectable {
    pub fallback: Vec<u8>,
}

/// A Reed-Solomon coder bound to one fixed shape.
pub struct Rs {
    shape: Shape,
    encoder: Encoder,
    decoder: Decoder,
}

impl Rs {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        let ecc_len = shape.ecc_len();
        Self { shape, encoder: Encoder::new(ecc_len), decoder: Decoder::new(ecc_len) }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Encodes exactly `shape.k()` bytes of `data` into `shape.n()` bytes, with `data[i]`
    /// at position `i` for `i < k` (systematic encoding).
    ///
    /// # Panics
    /// Panics if `data.len() != shape.k()`.
    #[must_use]
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        assert_eq!(data.len(), self.shape.k(), "Reed-Solomon encode: wrong input length for {:?}", self.shape);
        self.encoder.encode(data).as_ref().to_vec()
    }

    /// Decodes `shape.n()` bytes back to `shape.k()` bytes, correcting up to
    /// `shape.correctable_errors()` arbitrary-position byte errors. On failure, returns
    /// [`Uncorrectable`] carrying the best-effort fallback bytes.
    ///
    /// # Panics
    /// Panics if `bytes.len() != shape.n()`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, Uncorrectable> {
        assert_eq!(bytes.len(), self.shape.n(), "Reed-Solomon decode: wrong input length for {:?}", self.shape);
        match self.decoder.correct(bytes, None) {
            Ok(recovered) => Ok(recovered.data().to_vec()),
            Err(_) => Err(Uncorrectable { fallback: self.fallback(bytes) }),
        }
    }

    fn fallback(&self, bytes: &[u8]) -> Vec<u8> {
        if self.shape == Shape::Payload {
            bytes[..128].to_vec()
        } else {
            bytes[..self.shape.n() / 3].to_vec()
        }
    }
}

/// The payload-path "fast decode" optimization (§4.4/Glossary): returns the first 128
/// bytes of a 136-byte share without running any RS math at all. Used on the first
/// decrypt pass and disabled on a MAC-failure retry so full RS correction gets a chance.
#[must_use]
pub fn fast_decode_payload_unit(share: &[u8; 136]) -> [u8; 128] {
    let mut out = [0u8; 128];
    out.copy_from_slice(&share[..128]);
    out
}
