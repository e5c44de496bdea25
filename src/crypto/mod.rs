//! Cryptographic primitives: hashing, KDF/subkey derivation, the cipher cascade, and
//! MAC constructions. Each submodule wraps exactly one RustCrypto-family crate and adds
//! the all-zero / constant-time guards the volume format requires.

pub mod derive;
pub mod hash;
pub mod mac;
pub mod stream;

pub use derive::{SubkeyStream, derive_master_key};
pub use hash::{ct_eq, is_all_zero};
pub use mac::{HeaderMac, PayloadMac};
pub use stream::Cascade;
