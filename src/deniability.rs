//! The deniability wrapper (§4.3): an outer, unauthenticated Argon2id + XChaCha20 shell
//! that gives a volume's bytes no structural marker distinguishing them from random
//! data. It is a plausibility layer only, never part of the authenticated envelope.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use argon2::{Argon2, Params, Version};
use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use rand::rand_core::{OsRng, TryRngCore};
use sha3::{Digest, Sha3_256};
use tracing::instrument;

use crate::config::{
    DENIABILITY_ARGON_MEMORY_KIB, DENIABILITY_ARGON_PARALLELISM, DENIABILITY_ARGON_TIME, DENIABILITY_NONCE_LEN, DENIABILITY_ROTATE_BOUNDARY, DENIABILITY_SALT_LEN, MASTER_KEY_LEN,
};
use crate::crypto::hash::guard_nonzero;
use crate::encoding::{Rs, Shape};
use crate::error::{CoreError, IoDirection, fatal};

const COPY_CHUNK: usize = 1024 * 1024;

/// Wraps `input` into `output`: a random 16-byte salt, a random 24-byte nonce, then the
/// entire input XChaCha20-streamed under the shell key, with a nonce rotation every 60
/// GiB to avoid counter wraparound (§4.3).
#[instrument(skip(cancelled))]
pub fn wrap(input: &Path, output: &Path, password: &[u8], cancelled: &AtomicBool) -> Result<(), CoreError> {
    let salt = random_array::<DENIABILITY_SALT_LEN>();
    let nonce = random_array::<DENIABILITY_NONCE_LEN>();
    let key = derive_shell_key(password, &salt);

    let mut reader = BufReader::new(File::open(input).map_err(map_io_read)?);
    let mut writer = BufWriter::new(File::create(output).map_err(map_io_write)?);
    writer.write_all(&salt).map_err(map_io_write)?;
    writer.write_all(&nonce).map_err(map_io_write)?;

    let result = stream(&mut reader, &mut writer, key, nonce, cancelled);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result?;

    writer.flush().map_err(map_io_write)?;
    Ok(())
}

/// Unwraps `input` into `output`: reads the 16-byte salt and 24-byte nonce, derives the
/// shell key, and streams the remainder back. After unwrapping, checks that the first 15
/// decoded header bytes look like a version string (`^v\d\.\d{2}`); if not, the password
/// was wrong or this isn't a volume at all.
#[instrument(skip(cancelled))]
pub fn unwrap(input: &Path, output: &Path, password: &[u8], cancelled: &AtomicBool) -> Result<(), CoreError> {
    let mut reader = BufReader::new(File::open(input).map_err(map_io_read)?);

    let mut salt = [0u8; DENIABILITY_SALT_LEN];
    reader.read_exact(&mut salt).map_err(map_io_read)?;
    let mut nonce = [0u8; DENIABILITY_NONCE_LEN];
    reader.read_exact(&mut nonce).map_err(map_io_read)?;
    let key = derive_shell_key(password, &salt);

    let mut writer = BufWriter::new(File::create(output).map_err(map_io_write)?);
    let result = stream(&mut reader, &mut writer, key, nonce, cancelled);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result?;
    writer.flush().map_err(map_io_write)?;

    if !looks_like_a_volume(output)? {
        let _ = fs::remove_file(output);
        return Err(CoreError::auth_failure(crate::error::AuthFailureReason::PasswordIncorrectOrTampered));
    }

    Ok(())
}

fn derive_shell_key(password: &[u8], salt: &[u8; DENIABILITY_SALT_LEN]) -> [u8; MASTER_KEY_LEN] {
    let params = Params::new(DENIABILITY_ARGON_MEMORY_KIB, DENIABILITY_ARGON_TIME, DENIABILITY_ARGON_PARALLELISM, Some(MASTER_KEY_LEN))
        .unwrap_or_else(|e| fatal(&format!("invalid deniability Argon2 parameters: {e:?}")));
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; MASTER_KEY_LEN];
    argon2.hash_password_into(password, salt, &mut key).unwrap_or_else(|e| fatal(&format!("deniability Argon2id derivation failed: {e:?}")));
    guard_nonzero(&key, "deniability shell key");
    key
}

fn stream<R: Read, W: Write>(reader: &mut R, writer: &mut W, key: [u8; MASTER_KEY_LEN], mut nonce: [u8; DENIABILITY_NONCE_LEN], cancelled: &AtomicBool) -> Result<(), CoreError> {
    let mut cipher = XChaCha20::new((&key).into(), (&nonce).into());
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut bytes_since_rotation: u64 = 0;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        let n = reader.read(&mut buf).map_err(map_io_read)?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        cipher.apply_keystream(chunk);
        writer.write_all(chunk).map_err(map_io_write)?;

        bytes_since_rotation += n as u64;
        if bytes_since_rotation >= DENIABILITY_ROTATE_BOUNDARY {
            nonce = rotate_nonce(&nonce);
            cipher = XChaCha20::new((&key).into(), (&nonce).into());
            bytes_since_rotation = 0;
        }
    }

    Ok(())
}

/// Rotates the nonce to `SHA3-256(nonce)[:24]`, per §4.3.
fn rotate_nonce(nonce: &[u8; DENIABILITY_NONCE_LEN]) -> [u8; DENIABILITY_NONCE_LEN] {
    let digest = Sha3_256::digest(nonce);
    let mut next = [0u8; DENIABILITY_NONCE_LEN];
    next.copy_from_slice(&digest[..DENIABILITY_NONCE_LEN]);
    next
}

fn looks_like_a_volume(path: &Path) -> Result<bool, CoreError> {
    let rs = Rs::new(Shape::Field5);
    let mut file = File::open(path).map_err(map_io_read)?;
    let mut encoded = [0u8; 15];
    if file.read_exact(&mut encoded).is_err() {
        return Ok(false);
    }

    let decoded = match rs.decode(&encoded) {
        Ok(bytes) => bytes,
        Err(uncorrectable) => uncorrectable.fallback,
    };
    Ok(matches_version_pattern(&decoded))
}

/// Hand-checks the fixed-width `^v\d\.\d{2}` shape (`v`, one digit, `.`, two digits)
/// against the first five decoded header bytes, since this is the only place the
/// pipeline needs anything resembling a pattern match.
fn matches_version_pattern(decoded: &[u8]) -> bool {
    decoded.len() >= 5 && decoded[0] == b'v' && decoded[1].is_ascii_digit() && decoded[2] == b'.' && decoded[3].is_ascii_digit() && decoded[4].is_ascii_digit()
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.try_fill_bytes(&mut buf).unwrap_or_else(|e| fatal(&format!("CSPRNG failure generating deniability salt/nonce: {e}")));
    guard_nonzero(&buf, "deniability salt/nonce");
    buf
}

fn map_io_read(e: io::Error) -> CoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CoreError::AccessDenied(IoDirection::Read),
        _ => CoreError::Io(e),
    }
}

fn map_io_write(e: io::Error) -> CoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CoreError::AccessDenied(IoDirection::Write),
        io::ErrorKind::OutOfMemory => CoreError::InsufficientSpace,
        _ => CoreError::Io(e),
    }
}
