//! Top-level pipeline orchestration (§3 lifecycle, §4.10): ties the stager, header
//! codec, KDF/subkey derivation, payload codec, deniability wrapper, recombiner and
//! splitter together into the two flows an [`crate::operation::Operation`] worker thread
//! runs. [`run`] is the `pipeline` argument `Operation::start` expects in production.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::rand_core::{OsRng, TryRngCore};
use tracing::{info, instrument};

use crate::config::{CHACHA_NONCE_LEN, CURRENT_VERSION, HKDF_SALT_LEN, MASTER_KEY_LEN, SERPENT_IV_LEN, SUBKEY_HEADER_LEN, SUBKEY_PAYLOAD_LEN, SUBKEY_SERPENT_LEN};
use crate::crypto::derive::{SubkeyStream, derive_master_key};
use crate::crypto::hash::{ct_eq, guard_nonzero, sha3_256, sha3_512};
use crate::crypto::mac::PayloadMac;
use crate::crypto::stream::Cascade;
use crate::encoding::{Rs, Shape};
use crate::error::{AuthFailureReason, CoreError, IoDirection};
use crate::header::{Flags, Header};
use crate::keyfile::KeyfileSet;
use crate::operation::{Options, State, StatusHandle};
use crate::payload::{self, padding};
use crate::stage::{self, Staged};
use crate::types::ProcessorMode;
use crate::{autounzip, deniability, recombine, split};

/// Entry point the worker thread calls. Dispatches on `options.mode`.
pub fn run(options: Options, handle: &StatusHandle) -> Result<(), CoreError> {
    match options.mode {
        ProcessorMode::Encrypt => run_encrypt(&options, handle),
        ProcessorMode::Decrypt => run_decrypt(&options, handle),
    }
}

/// The HKDF-derived subkeys (§4.5): `subHeader` comes from a stream over the *pre-XOR*
/// master key, while `subPayload`/`serpentKey` (and every later rekey draw) come from a
/// second stream over the *post-XOR* key, discarding its first 64 bytes so the two
/// streams stay aligned. With no keyfiles, `post_xor_key == master_key`, so the two
/// streams are byte-identical and this degenerates to a single logical stream.
struct Subkeys {
    sub_header: [u8; SUBKEY_HEADER_LEN],
    sub_payload: [u8; SUBKEY_PAYLOAD_LEN],
    serpent_key: Option<[u8; SUBKEY_SERPENT_LEN]>,
    payload_stream: SubkeyStream,
}

fn derive_subkeys(master_key: &[u8; MASTER_KEY_LEN], hkdf_salt: &[u8; HKDF_SALT_LEN], post_xor_key: &[u8; MASTER_KEY_LEN], paranoid: bool) -> Subkeys {
    let mut header_stream = SubkeyStream::new(master_key, hkdf_salt);
    let sub_header = to_array::<SUBKEY_HEADER_LEN>(header_stream.next(SUBKEY_HEADER_LEN, "header MAC subkey"));

    let mut payload_stream = SubkeyStream::new(post_xor_key, hkdf_salt);
    let _ = payload_stream.next(SUBKEY_HEADER_LEN, "discarded prefix aligning the payload stream with the header stream");
    let sub_payload = to_array::<SUBKEY_PAYLOAD_LEN>(payload_stream.next(SUBKEY_PAYLOAD_LEN, "payload MAC subkey"));
    let serpent_bytes = to_array::<SUBKEY_SERPENT_LEN>(payload_stream.next(SUBKEY_SERPENT_LEN, "Serpent-CTR subkey"));
    let serpent_key = paranoid.then_some(serpent_bytes);

    Subkeys { sub_header, sub_payload, serpent_key, payload_stream }
}

fn post_xor(master_key: &[u8; MASTER_KEY_LEN], keyfile_key: &[u8; 32]) -> [u8; MASTER_KEY_LEN] {
    let mut out = [0u8; MASTER_KEY_LEN];
    for (o, (m, k)) in out.iter_mut().zip(master_key.iter().zip(keyfile_key.iter())) {
        *o = m ^ k;
    }
    out
}

#[instrument(skip_all)]
fn run_encrypt(options: &Options, handle: &StatusHandle) -> Result<(), CoreError> {
    handle.set_state(State::Staging);
    let staged_tmp = sibling_path(&options.output, "stage.tmp");
    let staged = stage::stage(&options.inputs, &staged_tmp, options.compress, handle.cancelled_flag())?;

    let result = run_encrypt_inner(options, handle, &staged);
    if let Staged::Masked { path, .. } = &staged {
        let _ = fs::remove_file(path);
    }
    result
}

fn run_encrypt_inner(options: &Options, handle: &StatusHandle, staged: &Staged) -> Result<(), CoreError> {
    let keyfiles_used = !options.keyfiles.is_empty();
    let keyfile_key = KeyfileSet::new(options.keyfiles.clone(), options.keyfile_ordered).derive_key()?;
    let keyfile_hash = sha3_256(&keyfile_key);

    handle.set_state(State::Kdf);
    let salt = random_array::<{ crate::config::ARGON_SALT_LEN }>("Argon2id salt");
    let hkdf_salt = random_array::<HKDF_SALT_LEN>("HKDF salt");
    let master_key = derive_master_key(options.password.as_bytes(), &salt, options.paranoid);
    let post_xor_key = post_xor(&master_key, &keyfile_key);
    let mut subkeys = derive_subkeys(&master_key, &hkdf_salt, &post_xor_key, options.paranoid);

    let nonce = random_array::<CHACHA_NONCE_LEN>("XChaCha20 nonce");
    let serpent_iv = random_array::<SERPENT_IV_LEN>("Serpent IV");

    let cascade = Cascade::new(post_xor_key, nonce, subkeys.serpent_key, options.paranoid.then_some(serpent_iv));
    let mac = PayloadMac::new(options.paranoid, &subkeys.sub_payload);

    let plaintext_path: &Path = match staged {
        Staged::Direct(path) => path,
        Staged::Masked { path, .. } => path,
    };
    let total_size = fs::metadata(plaintext_path).map_err(map_io_read)?.len();

    handle.set_state(State::HeaderIo);
    let padded_last_unit = options.reed_solomon && padding::padded_flag_for_size(total_size);
    let flags = Flags { paranoid: options.paranoid, keyfiles_used, keyfile_ordered: options.keyfile_ordered, reed_solomon: options.reed_solomon, padded_last_unit };
    let mut header = Header {
        version: CURRENT_VERSION.to_string(),
        comments: options.comments.clone(),
        flags,
        salt,
        hkdf_salt,
        serpent_iv,
        nonce,
        key_hash: [0u8; crate::config::HEADER_MAC_LEN],
        keyfile_hash,
        payload_tag: [0u8; crate::config::PAYLOAD_TAG_LEN],
        degraded: false,
    };
    header.key_hash = header.compute_mac(&subkeys.sub_header);

    let volume_path = if options.deniability { sibling_path(&options.output, "volume.tmp") } else { options.output.clone() };
    let incomplete = incomplete_path(&volume_path);

    let result = write_volume(options, handle, &mut header, cascade, mac, &mut subkeys.payload_stream, staged, total_size, &incomplete);
    if result.is_err() {
        let _ = fs::remove_file(&incomplete);
        return result;
    }
    fs::rename(&incomplete, &volume_path).map_err(map_io_write)?;

    handle.set_state(State::Finalizing);
    if options.deniability {
        handle.set_state(State::Wrapping);
        let wrap_result = deniability::wrap(&volume_path, &options.output, options.password.as_bytes(), handle.cancelled_flag());
        let _ = fs::remove_file(&volume_path);
        wrap_result?;
    }

    if options.split {
        handle.set_state(State::Splitting);
        let total = fs::metadata(&options.output).map_err(map_io_read)?.len();
        let chunk = split::chunk_size(options.split_size, options.split_unit, total);
        split::split(&options.output, chunk, handle.cancelled_flag())?;
    }

    info!(output = %options.output.display(), "volume encrypted");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_volume(options: &Options, handle: &StatusHandle, header: &mut Header, cascade: Cascade, mac: PayloadMac, stream: &mut SubkeyStream, staged: &Staged, total_size: u64, incomplete: &Path) -> Result<(), CoreError> {
    let mut writer = BufWriter::new(File::create(incomplete).map_err(map_io_write)?);
    header.write(&mut writer)?;
    writer.flush().map_err(map_io_write)?;
    let payload_tag_offset = header.on_disk_len() as u64 - 192;

    handle.set_progress(0, total_size);
    let source: Box<dyn Read> = match staged {
        Staged::Direct(path) => Box::new(BufReader::new(File::open(path).map_err(map_io_read)?)),
        Staged::Masked { path, key, nonce } => Box::new(stage::unmask_reader(path, *key, *nonce)),
    };
    let tracked = ProgressReader { inner: source, handle };

    handle.set_state(State::Payload);
    let (tag, _any_padded) = payload::encrypt_stream(tracked, &mut writer, cascade, mac, stream, options.reed_solomon, options.paranoid, handle.cancelled_flag())?;

    writer.flush().map_err(map_io_write)?;
    let mut file = writer.into_inner().map_err(|e| map_io_write(e.into_error()))?;
    file.seek(SeekFrom::Start(payload_tag_offset)).map_err(map_io_write)?;
    let rs = Rs::new(Shape::Field64);
    file.write_all(&rs.encode(&tag)).map_err(map_io_write)?;
    file.flush().map_err(map_io_write)?;
    header.payload_tag = tag;
    Ok(())
}

#[instrument(skip_all)]
fn run_decrypt(options: &Options, handle: &StatusHandle) -> Result<(), CoreError> {
    handle.set_state(State::Staging);
    let mut temp_files = Vec::new();
    let mut effective_input = options.inputs[0].clone();

    if options.recombine {
        let chunks = recombine::find_chunks(&effective_input);
        let recombined = sibling_path(&options.output, "recombined.tmp");
        if let Err(e) = recombine::recombine(&chunks, &recombined, handle.cancelled_flag()) {
            return Err(e);
        }
        effective_input = recombined.clone();
        temp_files.push(recombined);
    }

    if options.deniability {
        handle.set_state(State::Wrapping);
        let unwrapped = sibling_path(&options.output, "unwrapped.tmp");
        if let Err(e) = deniability::unwrap(&effective_input, &unwrapped, options.password.as_bytes(), handle.cancelled_flag()) {
            cleanup_temp_files(&temp_files);
            return Err(e);
        }
        effective_input = unwrapped.clone();
        temp_files.push(unwrapped);
    }

    let result = run_decrypt_inner(options, handle, &effective_input);
    cleanup_temp_files(&temp_files);
    result
}

fn cleanup_temp_files(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn run_decrypt_inner(options: &Options, handle: &StatusHandle, input: &Path) -> Result<(), CoreError> {
    handle.set_state(State::HeaderIo);
    let mut reader = BufReader::new(File::open(input).map_err(map_io_read)?);
    let header = Header::read(&mut reader, options.keep)?;
    if header.degraded {
        handle.set_kept(true);
    }

    let keyfile_key = KeyfileSet::new(options.keyfiles.clone(), header.flags.keyfile_ordered).derive_key()?;
    if !ct_eq(&sha3_256(&keyfile_key), &header.keyfile_hash) {
        return Err(CoreError::KeyfileMismatch { ordered: header.flags.keyfile_ordered });
    }

    handle.set_state(State::Kdf);
    let master_key = derive_master_key(options.password.as_bytes(), &header.salt, header.flags.paranoid);
    let post_xor_key = post_xor(&master_key, &keyfile_key);
    let mut subkeys = derive_subkeys(&master_key, &header.hkdf_salt, &post_xor_key, header.flags.paranoid);

    let header_auth_key = if header.is_legacy() { sha3_512(&post_xor_key).to_vec() } else { subkeys.sub_header.to_vec() };
    if !header.verify_mac(&header_auth_key) {
        return Err(CoreError::auth_failure(AuthFailureReason::PasswordIncorrectOrTampered));
    }

    if options.verify_first {
        handle.set_state(State::Done);
        return Ok(());
    }

    handle.set_state(State::Payload);
    let total_on_disk = fs::metadata(input).map_err(map_io_read)?.len();
    let header_len = header.on_disk_len() as u64;
    handle.set_progress(0, total_on_disk.saturating_sub(header_len));

    let incomplete = incomplete_path(&options.output);
    let kept = decrypt_payload(options, handle, &header, &post_xor_key, &mut subkeys, &mut reader, &incomplete)?;
    if kept {
        handle.set_kept(true);
    }

    fs::rename(&incomplete, &options.output).map_err(map_io_write)?;

    if options.auto_unzip && autounzip::is_zip_output(&options.output) {
        autounzip::extract(&options.output, options.same_level)?;
    }

    handle.set_state(State::Finalizing);
    info!(output = %options.output.display(), "volume decrypted");
    Ok(())
}

fn decrypt_payload(options: &Options, handle: &StatusHandle, header: &Header, post_xor_key: &[u8; MASTER_KEY_LEN], subkeys: &mut Subkeys, reader: &mut BufReader<File>, incomplete: &Path) -> Result<bool, CoreError> {
    let mut out = File::create(incomplete).map_err(map_io_write)?;

    let serpent_iv = header.flags.paranoid.then_some(header.serpent_iv);
    let serpent_key = subkeys.serpent_key;
    let cascade_factory = || Cascade::new(*post_xor_key, header.nonce, serpent_key, serpent_iv);

    let result = payload::decrypt_stream_with_retry(reader, &mut out, cascade_factory, &subkeys.sub_payload, header.flags.paranoid, header.flags.reed_solomon, header.flags.padded_last_unit, &header.payload_tag, options.keep, &mut subkeys.payload_stream, handle.cancelled_flag());

    if result.is_err() {
        let _ = fs::remove_file(incomplete);
    }
    result
}

/// `{path}.incomplete`: the atomic-rename pattern every disk-writing stage in this
/// codebase shares (§3 "Invariants").
fn incomplete_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".incomplete");
    PathBuf::from(name)
}

/// `<output path>.<suffix>`: a scratch path next to the final output, cleaned up by the
/// caller once consumed.
fn sibling_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn to_array<const N: usize>(bytes: Vec<u8>) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    arr
}

fn random_array<const N: usize>(what: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.try_fill_bytes(&mut buf).unwrap_or_else(|e| crate::error::fatal(&format!("CSPRNG failure generating {what}: {e}")));
    guard_nonzero(&buf, what);
    buf
}

/// Wraps a reader, reporting every byte read to `handle` as progress (§5). Cancellation
/// itself is polled by the payload codec at frame granularity; this only tracks bytes.
struct ProgressReader<'a, R> {
    inner: R,
    handle: &'a StatusHandle,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.handle.advance_progress(n as u64);
        }
        Ok(n)
    }
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

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::operation::Operation;
    use crate::types::SplitUnit;

    fn base_options(mode: ProcessorMode, input: PathBuf, output: PathBuf, password: &str) -> Options {
        Options::new(mode, vec![input], output, password.to_string())
    }

    #[test]
    fn round_trip_without_reed_solomon_or_paranoid() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("plain.txt");
        fs::write(&input, b"a small secret message").unwrap();
        let volume = dir.path().join("plain.txt.pcv");

        let enc_options = base_options(ProcessorMode::Encrypt, input.clone(), volume.clone(), "correct horse battery staple");
        Operation::start(enc_options, run).join().unwrap();
        assert!(volume.exists());

        let out = dir.path().join("plain.txt");
        fs::remove_file(&input).unwrap();
        let dec_options = base_options(ProcessorMode::Decrypt, volume.clone(), out.clone(), "correct horse battery staple");
        Operation::start(dec_options, run).join().unwrap();

        assert_eq!(fs::read(&out).unwrap(), b"a small secret message");
    }

    #[test]
    fn round_trip_with_reed_solomon_and_paranoid_mode() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("data.bin");
        fs::write(&input, vec![0x5Au8; crate::config::FRAME_SIZE + 37]).unwrap();
        let volume = dir.path().join("data.bin.pcv");

        let mut enc_options = base_options(ProcessorMode::Encrypt, input.clone(), volume.clone(), "hunter2");
        enc_options.paranoid = true;
        enc_options.reed_solomon = true;
        Operation::start(enc_options, run).join().unwrap();

        let out = dir.path().join("data.bin");
        fs::remove_file(&input).unwrap();
        let mut dec_options = base_options(ProcessorMode::Decrypt, volume.clone(), out.clone(), "hunter2");
        dec_options.paranoid = true;
        dec_options.reed_solomon = true;
        Operation::start(dec_options, run).join().unwrap();

        assert_eq!(fs::read(&out).unwrap(), vec![0x5Au8; crate::config::FRAME_SIZE + 37]);
    }

    #[test]
    fn wrong_password_fails_without_leaving_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("secret.txt");
        fs::write(&input, b"top secret").unwrap();
        let volume = dir.path().join("secret.txt.pcv");

        let enc_options = base_options(ProcessorMode::Encrypt, input, volume.clone(), "right password");
        Operation::start(enc_options, run).join().unwrap();

        let out = dir.path().join("secret.txt");
        let dec_options = base_options(ProcessorMode::Decrypt, volume, out.clone(), "wrong password");
        let result = Operation::start(dec_options, run).join();

        assert!(matches!(result, Err(CoreError::AuthFailure(_))));
        assert!(!out.exists());
    }

    #[test]
    fn keyfiles_are_required_and_order_sensitive() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("keyed.txt");
        fs::write(&input, b"needs keyfiles").unwrap();
        let kf_a = dir.path().join("a.key");
        let kf_b = dir.path().join("b.key");
        fs::write(&kf_a, b"alpha").unwrap();
        fs::write(&kf_b, b"bravo").unwrap();
        let volume = dir.path().join("keyed.txt.pcv");

        let mut enc_options = base_options(ProcessorMode::Encrypt, input, volume.clone(), "pw");
        enc_options.keyfiles = vec![kf_a.clone(), kf_b.clone()];
        enc_options.keyfile_ordered = true;
        Operation::start(enc_options, run).join().unwrap();

        let out = dir.path().join("keyed.txt");
        let mut dec_wrong_order = base_options(ProcessorMode::Decrypt, volume.clone(), out.clone(), "pw");
        dec_wrong_order.keyfiles = vec![kf_b.clone(), kf_a.clone()];
        let result = Operation::start(dec_wrong_order, run).join();
        assert!(matches!(result, Err(CoreError::KeyfileMismatch { ordered: true })));

        let mut dec_right_order = base_options(ProcessorMode::Decrypt, volume, out.clone(), "pw");
        dec_right_order.keyfiles = vec![kf_a, kf_b];
        Operation::start(dec_right_order, run).join().unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"needs keyfiles");
    }

    #[test]
    fn verify_first_does_not_write_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("v.txt");
        fs::write(&input, b"verify me").unwrap();
        let volume = dir.path().join("v.txt.pcv");

        let enc_options = base_options(ProcessorMode::Encrypt, input, volume.clone(), "pw");
        Operation::start(enc_options, run).join().unwrap();

        let out = dir.path().join("v.txt");
        let mut dec_options = base_options(ProcessorMode::Decrypt, volume, out.clone(), "pw");
        dec_options.verify_first = true;
        Operation::start(dec_options, run).join().unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn split_then_recombine_round_trips() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("split_me.txt");
        fs::write(&input, vec![9u8; 4096]).unwrap();
        let volume = dir.path().join("split_me.txt.pcv");

        let mut enc_options = base_options(ProcessorMode::Encrypt, input, volume.clone(), "pw");
        enc_options.split = true;
        enc_options.split_size = 3;
        enc_options.split_unit = SplitUnit::Total;
        Operation::start(enc_options, run).join().unwrap();
        assert!(!volume.exists());

        let out = dir.path().join("split_me.txt");
        let mut dec_options = base_options(ProcessorMode::Decrypt, volume.clone(), out.clone(), "pw");
        dec_options.recombine = true;
        Operation::start(dec_options, run).join().unwrap();
        assert_eq!(fs::read(&out).unwrap(), vec![9u8; 4096]);
    }
}
