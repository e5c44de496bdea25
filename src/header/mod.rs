//! # Volume Header
//!
//! The Reed-Solomon-protected volume header (§4.7, §6): every field on disk is its own
//! RS-encoded share, so a handful of flipped bits in any one field can be corrected (or,
//! in best-effort mode, reported as degraded) without invalidating the rest of the
//! header.
//!
//! ## Authentication
//!
//! The header MAC covers the decoded fields in a fixed order and is itself stored
//! RS(64,192)-encoded in the `keyHash` slot. Legacy `v1.` volumes use a different
//! `keyHash` semantics (a direct SHA3-512 rather than an HMAC) — see
//! [`Header::is_legacy`] and §9.
//!
//! ## Error Correction vs. Authentication
//!
//! Reed-Solomon correction and MAC verification are independent checks run in sequence:
//! a header can decode cleanly (or degrade to best-effort bytes under `keep`) and still
//! fail `verify_mac` if the password is wrong or the content was tampered with outside
//! what RS can fix.

use std::io::{self, Read, Write};

use tracing::{debug, instrument, warn};

use crate::config::{CHACHA_NONCE_LEN, FLAG_BYTES, FLAG_KEYFILE_ORDERED, FLAG_KEYFILES_USED, FLAG_PADDED_LAST_UNIT, FLAG_PARANOID, FLAG_REED_SOLOMON, HEADER_MAC_LEN, HKDF_SALT_LEN, KEYFILE_HASH_LEN, PAYLOAD_TAG_LEN, SERPENT_IV_LEN};
use crate::encoding::{Rs, Shape};
use crate::error::CoreError;

/// The five header flag bits (§6), packed one-per-byte in the on-disk flag field so each
/// survives RS correction independently rather than sharing a single bit-packed byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// Serpent-CTR cascade layered under XChaCha20, plus doubled Argon2 cost.
    pub paranoid: bool,
    /// At least one keyfile was XORed into the password before key derivation.
    pub keyfiles_used: bool,
    /// Keyfiles were combined in the order given rather than sorted.
    pub keyfile_ordered: bool,
    /// The payload is additionally RS-protected at 128-byte-unit granularity.
    pub reed_solomon: bool,
    /// The final Reed-Solomon unit of the payload was PKCS#7-padded to a full unit.
    pub padded_last_unit: bool,
}

impl Flags {
    #[must_use]
    pub fn to_bytes(self) -> [u8; FLAG_BYTES] {
        let mut bytes = [0u8; FLAG_BYTES];
        bytes[FLAG_PARANOID] = u8::from(self.paranoid);
        bytes[FLAG_KEYFILES_USED] = u8::from(self.keyfiles_used);
        bytes[FLAG_KEYFILE_ORDERED] = u8::from(self.keyfile_ordered);
        bytes[FLAG_REED_SOLOMON] = u8::from(self.reed_solomon);
        bytes[FLAG_PADDED_LAST_UNIT] = u8::from(self.padded_last_unit);
        bytes
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; FLAG_BYTES]) -> Self {
        Self {
            paranoid: bytes[FLAG_PARANOID] != 0,
            keyfiles_used: bytes[FLAG_KEYFILES_USED] != 0,
            keyfile_ordered: bytes[FLAG_KEYFILE_ORDERED] != 0,
            reed_solomon: bytes[FLAG_REED_SOLOMON] != 0,
            padded_last_unit: bytes[FLAG_PADDED_LAST_UNIT] != 0,
        }
    }
}

/// The decoded (post-RS) header record.
#[derive(Clone)]
pub struct Header {
    /// `"v2.00"` for volumes this codec writes; any `"v1.NN"` is accepted on read as
    /// legacy (see [`Header::is_legacy`]).
    pub version: String,
    /// User-supplied comment bytes, individually RS-encoded one byte per share on disk.
    pub comments: Vec<u8>,
    pub flags: Flags,
    /// Argon2id salt; random per volume, stored plaintext (not secret).
    pub salt: [u8; crate::config::ARGON_SALT_LEN],
    /// Salt for the HKDF-SHA3-256 subkey stream; independent of the Argon2 salt.
    pub hkdf_salt: [u8; HKDF_SALT_LEN],
    /// Serpent-CTR initial counter block, only meaningful when `flags.paranoid`.
    pub serpent_iv: [u8; SERPENT_IV_LEN],
    /// XChaCha20 base nonce for the payload cascade.
    pub nonce: [u8; CHACHA_NONCE_LEN],
    /// The header MAC (v2) or direct SHA3-512 digest (legacy v1), as verified by
    /// [`Header::verify_mac`].
    pub key_hash: [u8; HEADER_MAC_LEN],
    /// SHA3-256 of the combined keyfile material, used to distinguish a wrong password
    /// from wrong/missing keyfiles.
    pub keyfile_hash: [u8; KEYFILE_HASH_LEN],
    /// The payload's final authentication tag, checked by the payload codec after
    /// decryption.
    pub payload_tag: [u8; PAYLOAD_TAG_LEN],
    /// True if any field's RS decode fell back to best-effort bytes.
    pub degraded: bool,
}

impl Header {
    /// Whether this header uses the legacy v1 `keyHash` semantics (§9): any decoded
    /// version string beginning `v1.`, regardless of minor version.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.version.starts_with(crate::config::LEGACY_VERSION_PREFIX)
    }

    /// The ordered field list the header MAC covers (§4.7): everything except the MAC
    /// slot itself, the keyfile hash, and the payload tag (those come after it, and the
    /// keyfile hash/payload tag are themselves authenticated by being *covered* by this
    /// MAC once keyfile_hash is included per the listed order).
    fn mac_parts<'a>(version: &'a str, comments_len_field: &'a [u8], comments: &'a [u8], flags: &'a [u8], salt: &'a [u8], hkdf_salt: &'a [u8], serpent_iv: &'a [u8], nonce: &'a [u8], keyfile_hash: &'a [u8]) -> [&'a [u8]; 9] {
        [version.as_bytes(), comments_len_field, comments, flags, salt, hkdf_salt, serpent_iv, nonce, keyfile_hash]
    }

    /// Computes the header MAC over this header's fields (v2 path only).
    ///
    /// # Parameters
    /// * `sub_header_key` - the HKDF-derived header subkey, not the master key directly.
    #[must_use]
    pub fn compute_mac(&self, sub_header_key: &[u8]) -> [u8; HEADER_MAC_LEN] {
        let comments_len_field = format!("{:05}", self.comments.len());
        let flags = self.flags.to_bytes();
        let parts = Self::mac_parts(&self.version, comments_len_field.as_bytes(), &self.comments, &flags, &self.salt, &self.hkdf_salt, &self.serpent_iv, &self.nonce, &self.keyfile_hash);
        crate::crypto::mac::HeaderMac::compute(sub_header_key, &parts)
    }

    /// Verifies the header MAC (v2) or the legacy direct hash (v1), in constant time.
    ///
    /// # Parameters
    /// * `sub_header_key_or_legacy_hash` - the header subkey for v2 volumes, or the
    ///   legacy post-XOR key hash for v1 volumes; the caller picks the right one based
    ///   on [`Header::is_legacy`] before calling.
    #[must_use]
    pub fn verify_mac(&self, sub_header_key_or_legacy_hash: &[u8]) -> bool {
        if self.is_legacy() {
            crate::crypto::hash::ct_eq(&self.key_hash, sub_header_key_or_legacy_hash)
        } else {
            crate::crypto::hash::ct_eq(&self.key_hash, &self.compute_mac(sub_header_key_or_legacy_hash))
        }
    }

    /// Serializes the header to its bit-exact on-disk layout (§6): each field RS-encoded
    /// in turn, in the same order [`Header::mac_parts`] authenticates.
    ///
    /// # Errors
    /// Propagates the writer's I/O errors as [`CoreError::Io`].
    #[instrument(skip(self, writer))]
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), CoreError> {
        let version_rs = Rs::new(Shape::Field5);
        writer.write_all(&version_rs.encode(self.version.as_bytes()))?;

        let len_field = format!("{:05}", self.comments.len());
        writer.write_all(&version_rs.encode(len_field.as_bytes()))?;

        let comment_rs = Rs::new(Shape::Comment);
        for &byte in &self.comments {
            writer.write_all(&comment_rs.encode(&[byte]))?;
        }

        writer.write_all(&version_rs.encode(&self.flags.to_bytes()))?;

        let field16 = Rs::new(Shape::Field16);
        writer.write_all(&field16.encode(&self.salt))?;

        let field32 = Rs::new(Shape::Field32);
        writer.write_all(&field32.encode(&self.hkdf_salt))?;

        writer.write_all(&field16.encode(&self.serpent_iv))?;

        let field24 = Rs::new(Shape::Field24);
        writer.write_all(&field24.encode(&self.nonce))?;

        let field64 = Rs::new(Shape::Field64);
        writer.write_all(&field64.encode(&self.key_hash))?;
        writer.write_all(&field32.encode(&self.keyfile_hash))?;
        writer.write_all(&field64.encode(&self.payload_tag))?;

        debug!(version = %self.version, comments_len = self.comments.len(), "wrote header");
        Ok(())
    }

    /// Parses a header from `reader`. If `keep` is false, any RS field that fails full
    /// correction aborts with `HeaderCorrupt`; if `keep` is true, decoding continues with
    /// best-effort fallback bytes and `degraded` is set.
    ///
    /// # Errors
    /// * [`CoreError::HeaderCorrupt`] - an RS field is uncorrectable and `keep` is false,
    ///   or the decoded comments-length field exceeds the configured maximum.
    /// * [`CoreError::AccessDenied`] / [`CoreError::Io`] - the underlying read failed.
    ///
    /// Authentication (`verify_mac`) is a separate step the caller runs afterward; a
    /// header can parse successfully here and still fail authentication.
    #[instrument(skip(reader))]
    pub fn read<R: Read>(reader: &mut R, keep: bool) -> Result<Self, CoreError> {
        let mut degraded = false;

        let version_rs = Rs::new(Shape::Field5);
        let version_bytes = decode_field(reader, &version_rs, keep, &mut degraded)?;
        let version = String::from_utf8_lossy(&version_bytes).into_owned();

        let len_bytes = decode_field(reader, &version_rs, keep, &mut degraded)?;
        let comments_len: usize = String::from_utf8_lossy(&len_bytes).trim().parse().unwrap_or_else(|_| {
            warn!("comments length field unparsable, treating as 0");
            degraded = true;
            0
        });
        if comments_len > crate::config::MAX_COMMENTS_LEN {
            return Err(CoreError::HeaderCorrupt);
        }

        let comment_rs = Rs::new(Shape::Comment);
        let mut comments = Vec::with_capacity(comments_len);
        for _ in 0..comments_len {
            comments.push(decode_field(reader, &comment_rs, keep, &mut degraded)?[0]);
        }

        let flag_bytes = decode_field(reader, &version_rs, keep, &mut degraded)?;
        let mut flag_arr = [0u8; FLAG_BYTES];
        flag_arr.copy_from_slice(&flag_bytes[..FLAG_BYTES.min(flag_bytes.len())]);
        let flags = Flags::from_bytes(flag_arr);

        let field16 = Rs::new(Shape::Field16);
        let salt = to_array(decode_field(reader, &field16, keep, &mut degraded)?);

        let field32 = Rs::new(Shape::Field32);
        let hkdf_salt = to_array(decode_field(reader, &field32, keep, &mut degraded)?);

        let serpent_iv = to_array(decode_field(reader, &field16, keep, &mut degraded)?);

        let field24 = Rs::new(Shape::Field24);
        let nonce = to_array(decode_field(reader, &field24, keep, &mut degraded)?);

        let field64 = Rs::new(Shape::Field64);
        let key_hash = to_array(decode_field(reader, &field64, keep, &mut degraded)?);
        let keyfile_hash = to_array(decode_field(reader, &field32, keep, &mut degraded)?);
        let payload_tag = to_array(decode_field(reader, &field64, keep, &mut degraded)?);

        Ok(Self { version, comments, flags, salt, hkdf_salt, serpent_iv, nonce, key_hash, keyfile_hash, payload_tag, degraded })
    }

    /// Total on-disk size of this header's fixed+comment sections (offset of the framed
    /// payload, per §6's layout table: `309 + 3*commentsLen`).
    #[must_use]
    pub fn on_disk_len(&self) -> usize {
        15 + 15 + 3 * self.comments.len() + 15 + 48 + 96 + 48 + 72 + 192 + 96 + 192
    }
}

fn to_array<const N: usize>(bytes: Vec<u8>) -> [u8; N] {
    let mut arr = [0u8; N];
    let n = N.min(bytes.len());
    arr[..n].copy_from_slice(&bytes[..n]);
    arr
}

/// Reads and RS-decodes one field. On an uncorrectable share: `keep` false returns
/// `HeaderCorrupt` immediately; `keep` true sets `*degraded` and substitutes the
/// decoder's best-effort fallback bytes so parsing can continue to the next field.
fn decode_field<R: Read>(reader: &mut R, rs: &Rs, keep: bool, degraded: &mut bool) -> Result<Vec<u8>, CoreError> {
    let mut buf = vec![0u8; rs.shape().n()];
    reader.read_exact(&mut buf).map_err(map_io_read)?;
    match rs.decode(&buf) {
        Ok(data) => Ok(data),
        Err(uncorrectable) => {
            if keep {
                *degraded = true;
                Ok(uncorrectable.fallback)
            } else {
                Err(CoreError::HeaderCorrupt)
            }
        }
    }
}

fn map_io_read(e: io::Error) -> CoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CoreError::AccessDenied(crate::error::IoDirection::Read),
        _ => CoreError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            version: crate::config::CURRENT_VERSION.to_string(),
            comments: b"hello".to_vec(),
            flags: Flags { paranoid: false, keyfiles_used: false, keyfile_ordered: false, reed_solomon: true, padded_last_unit: false },
            salt: [1u8; crate::config::ARGON_SALT_LEN],
            hkdf_salt: [2u8; HKDF_SALT_LEN],
            serpent_iv: [3u8; SERPENT_IV_LEN],
            nonce: [4u8; CHACHA_NONCE_LEN],
            key_hash: [0u8; HEADER_MAC_LEN],
            keyfile_hash: [0u8; KEYFILE_HASH_LEN],
            payload_tag: [0u8; PAYLOAD_TAG_LEN],
            degraded: false,
        }
    }

    #[test]
    fn round_trip_write_read() {
        let mut header = sample_header();
        header.key_hash = header.compute_mac(&[9u8; 64]);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let parsed = Header::read(&mut cursor, false).unwrap();

        assert_eq!(parsed.version, header.version);
        assert_eq!(parsed.comments, header.comments);
        assert_eq!(parsed.flags, header.flags);
        assert_eq!(parsed.salt, header.salt);
        assert!(parsed.verify_mac(&[9u8; 64]));
        assert!(!parsed.degraded);
    }

    #[test]
    fn tampered_mac_key_fails_verification() {
        let mut header = sample_header();
        header.key_hash = header.compute_mac(&[9u8; 64]);
        assert!(!header.verify_mac(&[8u8; 64]));
    }

    #[test]
    fn legacy_prefix_detection_ignores_minor_version() {
        let mut header = sample_header();
        header.version = "v1.07".to_string();
        assert!(header.is_legacy());
        header.version = "v2.00".to_string();
        assert!(!header.is_legacy());
    }

    #[test]
    fn on_disk_len_matches_scenario_1_from_design() {
        let mut header = sample_header();
        header.comments.clear();
        // Offset of the framed payload for zero comments is 309 bytes (§6).
        assert_eq!(header.on_disk_len(), 309);
    }
}
