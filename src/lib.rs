//! Picocrypt NG - authenticated, error-corrected, optionally deniable file-encryption
//! volumes.
//!
//! - XChaCha20 (+ optional Serpent-CTR cascade in paranoid mode) for the payload cipher
//! - Argon2id for key derivation, HKDF-SHA3-256 for subkey expansion
//! - A systematic Reed-Solomon codec for header and (optionally) payload error correction
//! - A ZIP stager for multi-input/compressed encryption
//! - An unauthenticated deniability shell and a fixed-size splitter/recombiner

pub mod allocator;
pub mod autounzip;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod deniability;
pub mod encoding;
pub mod error;
pub mod header;
pub mod keyfile;
pub mod operation;
pub mod payload;
pub mod processor;
pub mod recombine;
pub mod secret;
pub mod split;
pub mod stage;
pub mod types;
pub mod ui;
