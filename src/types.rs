//! Common type definitions shared across the pipeline.

use std::fmt::{Display, Formatter, Result};

/// Which direction a volume operation runs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessorMode {
    /// Build a volume from plaintext input(s).
    Encrypt,
    /// Recover plaintext from a volume.
    Decrypt,
}

impl ProcessorMode {
    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Encrypt => "Encrypt",
            Self::Decrypt => "Decrypt",
        }
    }
}

impl Display for ProcessorMode {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// A processing operation in progress; carries a present-participle label distinct from
/// `ProcessorMode`'s imperative one, for progress/status display.
#[derive(Clone, Copy, Debug)]
pub enum Processing {
    Encryption,
    Decryption,
}

impl Processing {
    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Encryption => "Encrypting...",
            Self::Decryption => "Decrypting...",
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(self) -> ProcessorMode {
        match self {
            Self::Encryption => ProcessorMode::Encrypt,
            Self::Decryption => ProcessorMode::Decrypt,
        }
    }
}

impl Display for Processing {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// Unit for `--split-size`. `Total` interprets the size as a desired chunk *count*.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, strum::Display, strum::EnumString, clap::ValueEnum)]
pub enum SplitUnit {
    #[value(name = "kib")]
    KiB,
    #[default]
    #[value(name = "mib")]
    MiB,
    #[value(name = "gib")]
    GiB,
    #[value(name = "tib")]
    TiB,
    #[value(name = "total")]
    Total,
}

impl SplitUnit {
    /// Bytes per unit, or `None` for `Total` (which is not a byte unit).
    #[must_use]
    pub fn bytes(self) -> Option<u64> {
        match self {
            Self::KiB => Some(1024),
            Self::MiB => Some(1024 * 1024),
            Self::GiB => Some(1024 * 1024 * 1024),
            Self::TiB => Some(1024 * 1024 * 1024 * 1024),
            Self::Total => None,
        }
    }
}
