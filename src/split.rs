//! The Splitter (§4.8): chops a finished `.pcv` volume into fixed-size, sequentially
//! numbered chunks once the whole volume (and any deniability wrap) already exists on
//! disk.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::instrument;

use crate::config::COPY_CHUNK_SIZE;
use crate::error::{CoreError, IoDirection};
use crate::types::SplitUnit;

/// Computes the chunk size in bytes from `(split_size, unit)` and the volume's total
/// size. `Total` interprets `split_size` as a desired chunk *count*.
#[must_use]
pub fn chunk_size(split_size: u64, unit: SplitUnit, total_size: u64) -> u64 {
    match unit.bytes() {
        Some(bytes_per_unit) => split_size * bytes_per_unit,
        None => total_size.div_ceil(split_size.max(1)),
    }
}

/// Splits `volume` into `<volume>.0, .1, …` of `chunk_size` bytes each (the final chunk
/// may be shorter). Any pre-existing `<volume>.*` chunks are deleted first. Chunks are
/// written as `.incomplete` and renamed to their final names only once every chunk has
/// succeeded; cancellation or an error removes every chunk already written, plus the
/// source volume.
#[instrument(skip(cancelled))]
pub fn split(volume: &Path, chunk_size: u64, cancelled: &AtomicBool) -> Result<(), CoreError> {
    clear_existing_chunks(volume)?;

    let result = split_inner(volume, chunk_size, cancelled);
    if result.is_err() {
        let _ = fs::remove_file(volume);
        for path in existing_chunks(volume) {
            let _ = fs::remove_file(path);
        }
    }
    result
}

fn split_inner(volume: &Path, chunk_size: u64, cancelled: &AtomicBool) -> Result<(), CoreError> {
    let mut reader = BufReader::new(File::open(volume).map_err(map_io_read)?);
    let mut written_incomplete = Vec::new();
    let mut index = 0usize;

    loop {
        let incomplete_path = incomplete_chunk_path(volume, index);
        let mut writer = BufWriter::new(File::create(&incomplete_path).map_err(map_io_write)?);
        written_incomplete.push(incomplete_path.clone());

        let mut remaining = chunk_size;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut wrote_any = false;
        while remaining > 0 {
            if cancelled.load(Ordering::Relaxed) {
                return Err(CoreError::Cancelled);
            }
            let want = remaining.min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want]).map_err(map_io_read)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(map_io_write)?;
            remaining -= n as u64;
            wrote_any = true;
        }
        writer.flush().map_err(map_io_write)?;

        if !wrote_any {
            let _ = fs::remove_file(&incomplete_path);
            written_incomplete.pop();
            break;
        }
        index += 1;
    }

    for incomplete_path in &written_incomplete {
        let final_path = strip_incomplete_suffix(incomplete_path);
        fs::rename(incomplete_path, &final_path).map_err(map_io_write)?;
    }

    fs::remove_file(volume).map_err(map_io_write)?;
    Ok(())
}

/// Deletes every `<volume>.*` chunk already on disk (§4.8: "pre-delete any `<out>.*`
/// before writing"), a plain directory scan rather than the Recombiner's contiguous-index
/// walk, since stale chunks from a previous run may not be contiguous.
fn clear_existing_chunks(volume: &Path) -> Result<(), CoreError> {
    for path in existing_chunks(volume) {
        fs::remove_file(path).map_err(map_io_write)?;
    }
    Ok(())
}

fn existing_chunks(volume: &Path) -> Vec<PathBuf> {
    let Some(dir) = volume.parent() else { return Vec::new() };
    let Some(file_name) = volume.file_name().map(|n| n.to_string_lossy().into_owned()) else { return Vec::new() };
    let prefix = format!("{file_name}.");

    let Ok(entries) = fs::read_dir(if dir.as_os_str().is_empty() { Path::new(".") } else { dir }) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.file_name().map(|n| n.to_string_lossy().starts_with(&prefix)).unwrap_or(false))
        .collect()
}

fn final_chunk_path(volume: &Path, index: usize) -> PathBuf {
    let mut name = volume.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn incomplete_chunk_path(volume: &Path, index: usize) -> PathBuf {
    let mut name = volume.as_os_str().to_owned();
    name.push(format!(".{index}.incomplete"));
    PathBuf::from(name)
}

fn strip_incomplete_suffix(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    PathBuf::from(s.strip_suffix(".incomplete").expect("chunk path always carries the suffix"))
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
    fn chunk_size_from_byte_unit() {
        assert_eq!(chunk_size(5, SplitUnit::MiB, 100 * 1024 * 1024), 5 * 1024 * 1024);
    }

    #[test]
    fn chunk_size_from_total_count() {
        assert_eq!(chunk_size(3, SplitUnit::Total, 100), 34); // ceil(100/3)
        assert_eq!(chunk_size(4, SplitUnit::Total, 100), 25);
    }

    #[test]
    fn split_produces_expected_chunk_count_and_sizes() {
        let dir = tempdir().unwrap();
        let volume = dir.path().join("out.pcv");
        fs::write(&volume, vec![7u8; 10]).unwrap();
        let cancelled = AtomicBool::new(false);

        split(&volume, 4, &cancelled).unwrap();

        assert!(!volume.exists());
        assert_eq!(fs::read(final_chunk_path(&volume, 0)).unwrap().len(), 4);
        assert_eq!(fs::read(final_chunk_path(&volume, 1)).unwrap().len(), 4);
        assert_eq!(fs::read(final_chunk_path(&volume, 2)).unwrap().len(), 2);
        assert!(!final_chunk_path(&volume, 3).exists());
    }

    #[test]
    fn split_clears_preexisting_chunks_first() {
        let dir = tempdir().unwrap();
        let volume = dir.path().join("out.pcv");
        fs::write(&volume, vec![1u8; 4]).unwrap();
        fs::write(final_chunk_path(&volume, 0), b"stale").unwrap();
        fs::write(final_chunk_path(&volume, 5), b"stale-too").unwrap();
        let cancelled = AtomicBool::new(false);

        split(&volume, 10, &cancelled).unwrap();

        assert_eq!(fs::read(final_chunk_path(&volume, 0)).unwrap(), vec![1u8; 4]);
        assert!(!final_chunk_path(&volume, 5).exists());
    }

    #[test]
    fn cancelled_split_removes_everything() {
        let dir = tempdir().unwrap();
        let volume = dir.path().join("out.pcv");
        fs::write(&volume, vec![1u8; 4096]).unwrap();
        let cancelled = AtomicBool::new(true);

        let result = split(&volume, 10, &cancelled);

        assert!(result.is_err());
        assert!(!volume.exists());
        assert!(!final_chunk_path(&volume, 0).exists());
    }
}
