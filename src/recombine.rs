//! The Recombiner (§4.2): reassembles a split volume's `<input>.0, .1, …` chunks back
//! into a single `<output>.pcv` before the rest of the pipeline runs.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument};

use crate::config::COPY_CHUNK_SIZE;
use crate::error::{CoreError, IoDirection};

/// Scans for `<input>.0, <input>.1, …` until the first missing index, returning the
/// ordered chunk paths. Empty if `<input>.0` doesn't exist.
#[must_use]
pub fn find_chunks(input: &Path) -> Vec<PathBuf> {
    let mut chunks = Vec::new();
    loop {
        let candidate = chunk_path(input, chunks.len());
        if !candidate.is_file() {
            break;
        }
        chunks.push(candidate);
    }
    chunks
}

fn chunk_path(input: &Path, index: usize) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Concatenates `chunks` into `output` in 1 MiB reads. Removes the partial output on
/// cancellation or error.
#[instrument(skip(chunks, cancelled))]
pub fn recombine(chunks: &[PathBuf], output: &Path, cancelled: &AtomicBool) -> Result<(), CoreError> {
    let result = recombine_inner(chunks, output, cancelled);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

fn recombine_inner(chunks: &[PathBuf], output: &Path, cancelled: &AtomicBool) -> Result<(), CoreError> {
    let mut writer = BufWriter::new(File::create(output).map_err(map_io_write)?);
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];

    for chunk in chunks {
        let mut reader = BufReader::new(File::open(chunk).map_err(map_io_read)?);
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(CoreError::Cancelled);
            }
            let n = reader.read(&mut buf).map_err(map_io_read)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(map_io_write)?;
        }
    }

    writer.flush().map_err(map_io_write)?;
    debug!(chunks = chunks.len(), "recombined split volume");
    Ok(())
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

    #[test]
    fn finds_contiguous_chunks_and_stops_at_gap() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("volume.pcv");
        fs::write(chunk_path(&base, 0), b"a").unwrap();
        fs::write(chunk_path(&base, 1), b"b").unwrap();
        fs::write(chunk_path(&base, 3), b"d").unwrap(); // gap at index 2

        let chunks = find_chunks(&base);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], chunk_path(&base, 0));
        assert_eq!(chunks[1], chunk_path(&base, 1));
    }

    #[test]
    fn no_chunks_found_when_the_first_is_missing() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("volume.pcv");
        assert!(find_chunks(&base).is_empty());
    }

    #[test]
    fn recombine_concatenates_chunks_in_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("volume.pcv");
        fs::write(chunk_path(&base, 0), b"hello ").unwrap();
        fs::write(chunk_path(&base, 1), b"world").unwrap();

        let chunks = find_chunks(&base);
        let output = dir.path().join("out.pcv");
        let cancelled = AtomicBool::new(false);
        recombine(&chunks, &output, &cancelled).unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"hello world");
    }

    #[test]
    fn recombine_removes_partial_output_on_cancel() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("volume.pcv");
        fs::write(chunk_path(&base, 0), vec![0u8; 1024]).unwrap();

        let chunks = find_chunks(&base);
        let output = dir.path().join("out.pcv");
        let cancelled = AtomicBool::new(true);
        let result = recombine(&chunks, &output, &cancelled);

        assert!(result.is_err());
        assert!(!output.exists());
    }
}
