//! Chart archive handling
//!
//! Charts travel as `.tgz` archives whose entries live under a top-level
//! directory named after the chart. This module unpacks them, fingerprints
//! them, and moves freshly downloaded archives and unpacked trees into the
//! cache without ever exposing a partially written file.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

/// Extract an archive to a destination directory
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    std::fs::create_dir_all(dest)?;

    archive.unpack(dest).map_err(|e| CoreError::Archive {
        message: format!("Failed to unpack {}: {}", archive_path.display(), e),
    })?;

    Ok(())
}

/// Write a gzipped tarball holding `entries` (path, contents)
///
/// Headers use a fixed mtime so identical inputs produce identical archives.
pub fn write_archive(output: &Path, entries: &[(String, Vec<u8>)]) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, content) in entries {
        add_bytes_to_archive(&mut builder, path, content)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.flush()?;
    Ok(())
}

fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Move a staged file onto `target` unless `target` already exists
///
/// Returns `true` when the staged file was placed and `false` when another
/// writer got there first, in which case the existing file is kept and the
/// staged copy discarded. Both paths must be on the same filesystem.
pub fn place_atomically(staged: &Path, target: &Path) -> Result<bool> {
    match std::fs::hard_link(staged, target) {
        Ok(()) => {
            std::fs::remove_file(staged)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %target.display(), "archive already cached, keeping existing copy");
            std::fs::remove_file(staged)?;
            Ok(false)
        }
        // Filesystems without hard links: fall back to rename
        Err(_) => {
            if target.exists() {
                std::fs::remove_file(staged)?;
                return Ok(false);
            }
            std::fs::rename(staged, target)?;
            Ok(true)
        }
    }
}

/// Move every file of the `staged` tree into `dest`, replacing files there
///
/// Each file lands with a rename, so a reader of `dest` sees either the old
/// or the new contents, never a missing or half-written file. Files in
/// `dest` with no staged counterpart are left alone. Both trees must be on
/// the same filesystem.
pub fn install_tree(staged: &Path, dest: &Path) -> Result<()> {
    let entries = WalkDir::new(staged)
        .min_depth(1)
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;

    for entry in entries {
        let Ok(relative) = entry.path().strip_prefix(staged) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::rename(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chart_entries() -> Vec<(String, Vec<u8>)> {
        vec![
            (
                "web/Chart.yaml".to_string(),
                b"apiVersion: v2\nname: web\nversion: 1.0.0\n".to_vec(),
            ),
            ("web/values.yaml".to_string(), b"image:\n  repository: nginx\n".to_vec()),
        ]
    }

    #[test]
    fn test_write_and_extract_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("web-1.0.0.tgz");
        write_archive(&archive, &chart_entries()).unwrap();

        let dest = dir.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        let values = std::fs::read_to_string(dest.join("web/values.yaml")).unwrap();
        assert_eq!(values, "image:\n  repository: nginx\n");
        assert!(dest.join("web/Chart.yaml").exists());
    }

    #[test]
    fn test_install_tree_replaces_files_under_open_readers() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("web");
        std::fs::create_dir_all(dest.join("web")).unwrap();
        std::fs::write(dest.join("web/values.yaml"), b"old: true\n").unwrap();
        std::fs::write(dest.join("values.yaml"), b"overlay: true\n").unwrap();
        let mut reader = File::open(dest.join("web/values.yaml")).unwrap();

        let archive = dir.path().join("web-1.0.0.tgz");
        write_archive(&archive, &chart_entries()).unwrap();
        let staging = tempfile::Builder::new().prefix(".unpack-").tempdir_in(&dest).unwrap();
        extract_archive(&archive, staging.path()).unwrap();
        install_tree(staging.path(), &dest).unwrap();

        // The open handle keeps the contents it was opened with
        let mut before = String::new();
        reader.read_to_string(&mut before).unwrap();
        assert_eq!(before, "old: true\n");

        let after = std::fs::read_to_string(dest.join("web/values.yaml")).unwrap();
        assert_eq!(after, "image:\n  repository: nginx\n");
        assert!(dest.join("web/Chart.yaml").exists());
        assert_eq!(std::fs::read_to_string(dest.join("values.yaml")).unwrap(), "overlay: true\n");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.tgz");
        std::fs::write(&archive, b"not a tarball").unwrap();
        assert!(extract_archive(&archive, &dir.path().join("out")).is_err());
    }

    #[test]
    fn test_sha256_is_stable() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tgz");
        let b = dir.path().join("b.tgz");
        write_archive(&a, &chart_entries()).unwrap();
        write_archive(&b, &chart_entries()).unwrap();

        let digest = sha256_file(&a).unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_file(&b).unwrap());
    }

    #[test]
    fn test_place_atomically_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("web-1.0.0.tgz");

        let first = dir.path().join("first.partial");
        std::fs::write(&first, b"first").unwrap();
        assert!(place_atomically(&first, &target).unwrap());
        assert!(!first.exists());

        let second = dir.path().join("second.partial");
        std::fs::write(&second, b"second").unwrap();
        assert!(!place_atomically(&second, &target).unwrap());
        assert!(!second.exists());

        assert_eq!(std::fs::read(&target).unwrap(), b"first");
    }
}
