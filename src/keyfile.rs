//! Keyfile sets (§3, §4.5, Glossary "Keyfile"): an ordered or unordered collection of
//! file paths whose SHA3-256 digests combine into a single 32-byte value that XORs into
//! the master key.

use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::hash::sha3_256;
use crate::error::CoreError;

/// An ordered or unordered collection of keyfile paths.
pub struct KeyfileSet {
    paths: Vec<PathBuf>,
    ordered: bool,
}

impl KeyfileSet {
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, ordered: bool) -> Self {
        Self { paths, ordered }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// Computes `keyfileKey` (§3): ordered sets concatenate-hash each file's bytes with
    /// SHA3-256 in path order; unordered sets XOR-fold the per-file SHA3-256 digests, so
    /// any permutation of the same files produces the same key.
    ///
    /// Returns `Err(DuplicateKeyfiles)` when, in unordered mode, the fold produces an
    /// all-zero result — an even number of identical keyfiles cancelled out (§7, §8
    /// property 9).
    pub fn derive_key(&self) -> Result<[u8; 32], CoreError> {
        if self.ordered {
            let mut concatenated = Vec::new();
            for path in &self.paths {
                concatenated.extend_from_slice(&read_keyfile(path)?);
            }
            Ok(sha3_256(&concatenated))
        } else {
            let mut folded = [0u8; 32];
            for path in &self.paths {
                let digest = sha3_256(&read_keyfile(path)?);
                for (acc, byte) in folded.iter_mut().zip(digest) {
                    *acc ^= byte;
                }
            }
            if crate::crypto::hash::is_all_zero(&folded) && !self.paths.is_empty() {
                return Err(CoreError::DuplicateKeyfiles);
            }
            Ok(folded)
        }
    }
}

fn read_keyfile(path: &Path) -> Result<Vec<u8>, CoreError> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => CoreError::AccessDenied(crate::error::IoDirection::Read),
        _ => CoreError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn keyfile_with(contents: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f
    }

    #[test]
    fn ordered_set_is_sensitive_to_swap() {
        let a = keyfile_with(b"alpha");
        let b = keyfile_with(b"bravo");

        let forward = KeyfileSet::new(vec![a.path().to_path_buf(), b.path().to_path_buf()], true);
        let swapped = KeyfileSet::new(vec![b.path().to_path_buf(), a.path().to_path_buf()], true);

        assert_ne!(forward.derive_key().unwrap(), swapped.derive_key().unwrap());
    }

    #[test]
    fn unordered_set_is_insensitive_to_permutation() {
        let a = keyfile_with(b"alpha");
        let b = keyfile_with(b"bravo");

        let forward = KeyfileSet::new(vec![a.path().to_path_buf(), b.path().to_path_buf()], false);
        let swapped = KeyfileSet::new(vec![b.path().to_path_buf(), a.path().to_path_buf()], false);

        assert_eq!(forward.derive_key().unwrap(), swapped.derive_key().unwrap());
    }

    #[test]
    fn unordered_set_detects_duplicate_cancellation() {
        let a = keyfile_with(b"same-contents");
        let b = keyfile_with(b"same-contents");

        let set = KeyfileSet::new(vec![a.path().to_path_buf(), b.path().to_path_buf()], false);
        assert!(matches!(set.derive_key(), Err(CoreError::DuplicateKeyfiles)));
    }

    #[test]
    fn empty_set_derives_a_zero_key_without_error() {
        let set = KeyfileSet::new(vec![], false);
        assert_eq!(set.derive_key().unwrap(), [0u8; 32]);
    }
}
