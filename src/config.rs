//! Application configuration and cryptographic constants.
//!
//! Single source of truth for the volume format: Argon2id parameters, the Reed-Solomon
//! shape table, frame/rekey sizing, and filename conventions. Every numeric value here
//! is load-bearing for on-disk compatibility — changing one changes the wire format.

use std::time::Duration;

/// Application name used in user-facing output.
pub const APP_NAME: &str = "Picocrypt NG";

/// Extension appended to produced volumes.
pub const VOLUME_EXTENSION: &str = "pcv";

/// Current volume format version string, stored verbatim in the first header field.
pub const CURRENT_VERSION: &str = "v2.00";

/// Legacy version prefix: any decoded version string starting with this is handled by
/// the v1 compatibility path regardless of its minor version.
pub const LEGACY_VERSION_PREFIX: &str = "v1.";

/// Argon2id time cost for the normal (non-paranoid) master key derivation.
pub const ARGON_TIME_NORMAL: u32 = 4;

/// Argon2id time cost for paranoid mode.
pub const ARGON_TIME_PARANOID: u32 = 8;

/// Argon2id memory cost, in KiB, for master key derivation (1 GiB, both modes).
pub const ARGON_MEMORY_KIB: u32 = 1024 * 1024;

/// Argon2id parallelism for the normal (non-paranoid) master key derivation.
pub const ARGON_PARALLELISM_NORMAL: u32 = 4;

/// Argon2id parallelism for paranoid mode.
pub const ARGON_PARALLELISM_PARANOID: u32 = 8;

/// Length of the derived master key, in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Length of the Argon2id salt (header field), in bytes.
pub const ARGON_SALT_LEN: usize = 16;

/// Length of the HKDF salt (header field), in bytes.
pub const HKDF_SALT_LEN: usize = 32;

/// Length of the Serpent-CTR IV (header field), in bytes.
pub const SERPENT_IV_LEN: usize = 16;

/// Length of the XChaCha20 nonce (header field), in bytes.
pub const CHACHA_NONCE_LEN: usize = 24;

/// Length of the header MAC ("keyHash" slot), in bytes.
pub const HEADER_MAC_LEN: usize = 64;

/// Length of the keyfile hash slot, in bytes.
pub const KEYFILE_HASH_LEN: usize = 32;

/// Length of the payload authentication tag, in bytes.
pub const PAYLOAD_TAG_LEN: usize = 64;

/// Length of the HKDF-derived header-MAC subkey, in bytes.
pub const SUBKEY_HEADER_LEN: usize = 64;

/// Length of the HKDF-derived payload-MAC subkey, in bytes.
pub const SUBKEY_PAYLOAD_LEN: usize = 32;

/// Length of the HKDF-derived Serpent-CTR key, in bytes.
pub const SUBKEY_SERPENT_LEN: usize = 32;

/// Plaintext frame size for the payload codec: 1 MiB.
pub const FRAME_SIZE: usize = 1024 * 1024;

/// Payload unit size fed into the (128,136) Reed-Solomon codec.
pub const RS_PAYLOAD_UNIT: usize = 128;

/// Number of processed bytes between cipher rekey events: 60 GiB.
pub const REKEY_BOUNDARY: u64 = 60 * 1024 * 1024 * 1024;

/// Number of processed bytes between nonce rotations in the deniability shell: 60 GiB.
pub const DENIABILITY_ROTATE_BOUNDARY: u64 = 60 * 1024 * 1024 * 1024;

/// Argon2id time cost for the deniability shell's key derivation.
pub const DENIABILITY_ARGON_TIME: u32 = 4;

/// Argon2id memory cost, in KiB, for the deniability shell (1 GiB).
pub const DENIABILITY_ARGON_MEMORY_KIB: u32 = 1024 * 1024;

/// Argon2id parallelism for the deniability shell.
pub const DENIABILITY_ARGON_PARALLELISM: u32 = 4;

/// Length of the deniability shell's salt, in bytes.
pub const DENIABILITY_SALT_LEN: usize = 16;

/// Length of the deniability shell's nonce, in bytes.
pub const DENIABILITY_NONCE_LEN: usize = 24;

/// Maximum comment length, inclusive.
pub const MAX_COMMENTS_LEN: usize = 99_999;

/// Maximum password length, inclusive.
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Maximum raw digits accepted for `--split-size`.
pub const MAX_SPLIT_SIZE_LEN: usize = 20;

/// Number of flag bytes carried in the header.
pub const FLAG_BYTES: usize = 5;

/// Flag byte index: paranoid mode (Serpent-CTR cascade + HMAC-SHA3-512 + doubled Argon2id).
pub const FLAG_PARANOID: usize = 0;
/// Flag byte index: one or more keyfiles were used.
pub const FLAG_KEYFILES_USED: usize = 1;
/// Flag byte index: keyfiles were combined in order-sensitive mode.
pub const FLAG_KEYFILE_ORDERED: usize = 2;
/// Flag byte index: payload units are Reed-Solomon protected.
pub const FLAG_REED_SOLOMON: usize = 3;
/// Flag byte index: the final payload unit was PKCS#7-padded.
pub const FLAG_PADDED_LAST_UNIT: usize = 4;

/// Cadence, in processed bytes, at which cancellation is polled (~1 frame).
pub const CANCEL_POLL_GRANULARITY: usize = FRAME_SIZE;

/// Recombiner/Stager copy chunk size.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// How often the frontend may assume a progress snapshot is stale before refreshing.
pub const PROGRESS_REFRESH_INTERVAL: Duration = Duration::from_millis(100);
