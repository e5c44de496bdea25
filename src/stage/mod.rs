//! The Stager (§4.1): collapses multiple input files/directory roots into a single
//! archive the rest of the pipeline treats as one plaintext stream.
//!
//! For a single file with compression off, staging is skipped entirely and the input
//! file is used directly. Otherwise every input is walked (directories recursively),
//! written into a ZIP (`Store` unless `compress`, then `Deflate`), and the resulting
//! archive bytes are XOR-masked on disk by an ephemeral ChaCha20 stream so an aborted run
//! never leaves plaintext behind. The mask is not part of the security envelope.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use rand::rand_core::{OsRng, TryRngCore};
use tracing::{debug, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::COPY_CHUNK_SIZE;
use crate::error::{CoreError, IoDirection};

/// A single staged input: its path on disk and the name it should carry inside the
/// archive (already stripped of the dropped root prefix and normalized to `/`).
struct Entry {
    source: PathBuf,
    archive_name: String,
}

/// The outcome of staging: either the caller's single input file, used directly, or a
/// freshly written, XOR-masked temporary file that must be cleaned up by the caller once
/// the payload pass has consumed it.
pub enum Staged {
    Direct(PathBuf),
    Masked { path: PathBuf, key: [u8; 32], nonce: [u8; 12] },
}

/// Stages `inputs` (files and/or directory roots) into `output_tmp` (the sibling
/// `<output>.tmp` path), or returns the input directly when it is a single file and
/// `compress` is false.
#[instrument(skip(inputs, cancelled))]
pub fn stage(inputs: &[PathBuf], output_tmp: &Path, compress: bool, cancelled: &AtomicBool) -> Result<Staged, CoreError> {
    if inputs.len() == 1 && !compress && inputs[0].is_file() {
        return Ok(Staged::Direct(inputs[0].clone()));
    }

    let entries = collect_entries(inputs)?;
    let key = random_array::<32>();
    let nonce = random_array::<12>();

    let result = write_masked_zip(&entries, output_tmp, compress, &key, &nonce, cancelled);
    if result.is_err() {
        let _ = fs::remove_file(output_tmp);
    }
    result?;

    Ok(Staged::Masked { path: output_tmp.to_path_buf(), key, nonce })
}

/// Reverses the ephemeral XOR mask over the staged file at `path`, returning a reader
/// positioned at the start of plaintext ZIP bytes.
#[must_use]
pub fn unmask_reader(path: &Path, key: [u8; 32], nonce: [u8; 12]) -> MaskedReader<BufReader<File>> {
    MaskedReader::new(BufReader::new(File::open(path).expect("staged temp file must exist")), key, nonce)
}

fn collect_entries(inputs: &[PathBuf]) -> Result<Vec<Entry>, CoreError> {
    let mut entries = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let root_name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            for dir_entry in WalkDir::new(input).into_iter() {
                let dir_entry = dir_entry.map_err(map_walkdir_err)?;
                if !dir_entry.file_type().is_file() {
                    continue;
                }
                let relative = dir_entry.path().strip_prefix(input).unwrap_or(dir_entry.path());
                let archive_name = format!("{root_name}/{}", normalize_separators(relative));
                entries.push(Entry { source: dir_entry.path().to_path_buf(), archive_name });
            }
        } else {
            let archive_name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| input.to_string_lossy().into_owned());
            entries.push(Entry { source: input.clone(), archive_name });
        }
    }

    Ok(entries)
}

fn normalize_separators(path: &Path) -> String {
    path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/")
}

fn write_masked_zip(entries: &[Entry], output_tmp: &Path, compress: bool, key: &[u8; 32], nonce: &[u8; 12], cancelled: &AtomicBool) -> Result<(), CoreError> {
    let file = File::create(output_tmp).map_err(map_io_write)?;
    let masked = MaskedWriter::new(BufWriter::new(file), *key, *nonce);
    let mut zip = ZipWriter::new(masked);

    let method = if compress { CompressionMethod::Deflated } else { CompressionMethod::Stored };
    let options = SimpleFileOptions::default().compression_method(method);

    for entry in entries {
        if cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        zip.start_file(&entry.archive_name, options).map_err(map_zip_err)?;
        copy_with_cancel(&entry.source, &mut zip, cancelled)?;
    }

    zip.finish().map_err(map_zip_err)?;
    debug!(count = entries.len(), "staged archive written");
    Ok(())
}

fn copy_with_cancel<W: Write>(source: &Path, dest: &mut W, cancelled: &AtomicBool) -> Result<(), CoreError> {
    let mut reader = BufReader::new(File::open(source).map_err(map_io_read)?);
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        let n = reader.read(&mut buf).map_err(map_io_read)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n]).map_err(map_io_write)?;
    }
    Ok(())
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.try_fill_bytes(&mut buf).unwrap_or_else(|e| crate::error::fatal(&format!("CSPRNG failure generating stager mask: {e}")));
    crate::crypto::hash::guard_nonzero(&buf, "stager mask key/nonce");
    buf
}

/// Applies the ephemeral ChaCha20 mask to every byte written through it.
struct MaskedWriter<W> {
    inner: W,
    cipher: ChaCha20,
}

impl<W: Write> MaskedWriter<W> {
    fn new(inner: W, key: [u8; 32], nonce: [u8; 12]) -> Self {
        Self { inner, cipher: ChaCha20::new((&key).into(), (&nonce).into()) }
    }
}

impl<W: Write> Write for MaskedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut masked = buf.to_vec();
        self.cipher.apply_keystream(&mut masked);
        self.inner.write(&masked)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reverses [`MaskedWriter`]'s mask on read, since ChaCha20 keystream XOR is its own
/// inverse.
pub struct MaskedReader<R> {
    inner: R,
    cipher: ChaCha20,
}

impl<R: Read> MaskedReader<R> {
    fn new(inner: R, key: [u8; 32], nonce: [u8; 12]) -> Self {
        Self { inner, cipher: ChaCha20::new((&key).into(), (&nonce).into()) }
    }
}

impl<R: Read> Read for MaskedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

/// ZIP reading needs random access to the central directory, so the mask must be
/// seekable too; ChaCha20 is a counter-mode stream cipher, so re-positioning the
/// keystream to match a seek on the underlying reader is just setting its block counter.
impl<R: Read + Seek> Seek for MaskedReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = self.inner.seek(pos)?;
        self.cipher.seek(new_pos);
        Ok(new_pos)
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

fn map_walkdir_err(e: walkdir::Error) -> CoreError {
    match e.into_io_error() {
        Some(io_err) => map_io_read(io_err),
        None => CoreError::HeaderCorrupt, // unreachable: walkdir errors are always I/O-backed
    }
}

fn map_zip_err(e: zip::result::ZipError) -> CoreError {
    match e {
        zip::result::ZipError::Io(io_err) => map_io_write(io_err),
        other => CoreError::Io(io::Error::other(other)),
    }
}
