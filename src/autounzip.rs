//! Auto-unzip (§4.9): when decrypted output is itself a ZIP (`*.zip.pcv` → `*.zip`) and
//! requested, extract its entries next to it and remove the `.zip` on success.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::error::{CoreError, IoDirection};

/// Whether `output` (the freshly decrypted file) is eligible for auto-unzip: its name
/// ends in `.zip`.
#[must_use]
pub fn is_zip_output(output: &Path) -> bool {
    output.extension().and_then(|e| e.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Extracts `zip_path`'s entries into `dirname(zip_path)/basename-without-.zip/`, or
/// directly into `dirname(zip_path)/` when `same_level` is set. Any entry name containing
/// `..` is rejected outright (path traversal). Removes `zip_path` once every entry has
/// been extracted.
#[instrument(skip(zip_path))]
pub fn extract(zip_path: &Path, same_level: bool) -> Result<(), CoreError> {
    let parent = zip_path.parent().unwrap_or_else(|| Path::new("."));
    let dest_dir = if same_level {
        parent.to_path_buf()
    } else {
        let stem = zip_path.file_stem().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("extracted"));
        parent.join(stem)
    };

    fs::create_dir_all(&dest_dir).map_err(map_io_write)?;

    let file = File::open(zip_path).map_err(map_io_read)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(map_zip_err)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(map_zip_err)?;
        let name = entry.name();
        if name.contains("..") {
            return Err(CoreError::Io(io::Error::other(format!("zip entry '{name}' contains a path traversal component"))));
        }

        let out_path = dest_dir.join(name);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(map_io_write)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(map_io_write)?;
        }

        let mut out_file = File::create(&out_path).map_err(map_io_write)?;
        io::copy(&mut entry, &mut out_file).map_err(map_io_write)?;
        out_file.flush().map_err(map_io_write)?;
    }

    fs::remove_file(zip_path).map_err(map_io_write)?;
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

fn map_zip_err(e: zip::result::ZipError) -> CoreError {
    match e {
        zip::result::ZipError::Io(io_err) => map_io_read(io_err),
        other => CoreError::Io(io::Error::other(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tempfile::tempdir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn is_zip_output_matches_extension_case_insensitively() {
        assert!(is_zip_output(Path::new("archive.zip")));
        assert!(is_zip_output(Path::new("archive.ZIP")));
        assert!(!is_zip_output(Path::new("archive.txt")));
    }

    #[test]
    fn extracts_into_basename_directory_by_default() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        make_zip(&zip_path, &[("a.txt", b"one"), ("sub/b.txt", b"two")]);

        extract(&zip_path, false).unwrap();

        assert!(!zip_path.exists());
        assert_eq!(fs::read(dir.path().join("bundle/a.txt")).unwrap(), b"one");
        assert_eq!(fs::read(dir.path().join("bundle/sub/b.txt")).unwrap(), b"two");
    }

    #[test]
    fn extracts_directly_when_same_level_is_set() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        make_zip(&zip_path, &[("a.txt", b"one")]);

        extract(&zip_path, true).unwrap();

        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"one");
    }

    #[test]
    fn rejects_path_traversal_entries() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        make_zip(&zip_path, &[("../escape.txt", b"pwned")]);

        let result = extract(&zip_path, false);
        assert!(result.is_err());
        assert!(zip_path.exists());
    }
}
