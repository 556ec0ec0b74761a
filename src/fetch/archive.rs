// src/fetch/archive.rs

//! Archive decoding and extraction
//!
//! Archives are tarballs behind a compression codec chosen by file
//! extension, plus two container formats: `.deb` (an AR archive whose
//! `data.tar*` member holds the payload) and `.snap` (squashfs, handed to
//! `unsquashfs`).
//!
//! Plain tarballs are extracted with their single top-level directory
//! stripped, so `zlib-1.3.tar.gz` containing `zlib-1.3/...` lands
//! directly in the source directory.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Compression codec in front of a tar stream, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    /// No compression: a bare tarball.
    None,
}

impl Codec {
    /// Pick the codec for a file name. `.apk` files are gzip-compressed
    /// tars in disguise.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".gz") || name.ends_with(".tgz") || name.ends_with(".apk") {
            Self::Gzip
        } else if name.ends_with(".bz2") {
            Self::Bzip2
        } else if name.ends_with(".xz") {
            Self::Xz
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Wrap a raw reader in the matching decoder.
    pub fn reader<'a>(self, inner: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(inner)),
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(inner)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(inner)),
            Self::Zstd => Box::new(
                zstd::stream::read::Decoder::new(inner)
                    .map_err(|e| Error::ArchiveError(format!("failed to create zstd reader: {}", e)))?,
            ),
            Self::None => inner,
        })
    }
}

/// Extract an archive into `dest`, dispatching on the file name.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.ends_with(".deb") {
        return extract_deb(archive, dest);
    }
    if name.ends_with(".snap") {
        return extract_snap(archive, dest);
    }

    let file = File::open(archive)
        .map_err(|e| Error::ArchiveError(format!("failed to open {}: {}", archive.display(), e)))?;
    let reader = Codec::from_name(name).reader(Box::new(file))?;
    extract_tar(reader, dest, true)
}

/// Extract a tar stream into `dest`.
///
/// With `strip_top` set, the first non-PAX entry's first path segment is
/// treated as the archive's top-level directory: the entry naming exactly
/// that directory is skipped, and the `<top>/` prefix is stripped from
/// everything underneath it. Entries left with an empty name are skipped.
fn extract_tar(reader: impl Read, dest: &Path, strip_top: bool) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    let entries = tar
        .entries()
        .map_err(|e| Error::ArchiveError(format!("failed to read tar: {}", e)))?;

    let mut top_level: Option<String> = None;
    let mut first = true;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::ArchiveError(format!("failed to read tar: {}", e)))?;
        let kind = entry.header().entry_type();

        if kind == tar::EntryType::XGlobalHeader {
            debug!("Skipping PAX global header");
            continue;
        }

        let raw = entry
            .path()
            .map_err(|e| Error::ArchiveError(format!("invalid entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let trimmed = raw.trim_start_matches("./").trim_end_matches('/');

        let name = if strip_top {
            if first {
                top_level = trimmed.split('/').next().map(str::to_string);
                first = false;
                debug!("Detected top-level directory: {:?} (from: {})", top_level, raw);
            }
            match &top_level {
                Some(top) if trimmed == top => {
                    debug!("Skipping top-level directory: {}", trimmed);
                    continue;
                }
                Some(top) => trimmed
                    .strip_prefix(&format!("{}/", top))
                    .unwrap_or(trimmed)
                    .to_string(),
                None => trimmed.to_string(),
            }
        } else {
            trimmed.to_string()
        };

        if name.is_empty() {
            debug!("Skipping empty name (was: {})", raw);
            continue;
        }

        let target = dest.join(&name);
        let mode = entry
            .header()
            .mode()
            .map_err(|e| Error::ArchiveError(format!("invalid entry mode: {}", e)))?;

        match kind {
            tar::EntryType::Directory => {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(&target)
                    .map_err(|e| {
                        Error::ArchiveError(format!("failed to create directory: {}", e))
                    })?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::DirBuilder::new()
                        .recursive(true)
                        .mode(0o755)
                        .create(parent)
                        .map_err(|e| {
                            Error::ArchiveError(format!("failed to create parent directory: {}", e))
                        })?;
                }
                let mut out = fs::OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .mode(mode)
                    .open(&target)
                    .map_err(|e| Error::ArchiveError(format!("failed to create file: {}", e)))?;
                io::copy(&mut entry, &mut out)
                    .map_err(|e| Error::ArchiveError(format!("failed to write file: {}", e)))?;
            }
            tar::EntryType::Symlink => {
                if let Ok(Some(link)) = entry.link_name() {
                    let _ = std::os::unix::fs::symlink(&link, &target);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Extract the `data.tar*` member of a `.deb` (AR container). The payload
/// is laid out with `./` prefixes rather than a versioned top directory,
/// so no stripping is applied.
fn extract_deb(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| Error::ArchiveError(format!("failed to open {}: {}", archive.display(), e)))?;
    let mut container = ar::Archive::new(file);

    while let Some(entry) = container.next_entry() {
        let mut entry =
            entry.map_err(|e| Error::ArchiveError(format!("failed to read AR entry: {}", e)))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();

        if name.starts_with("data.tar") {
            debug!("Found data archive in .deb: {}", name);
            let reader = Codec::from_name(&name).reader(Box::new(&mut entry))?;
            return extract_tar(reader, dest, false);
        }
    }

    Err(Error::ArchiveError(
        "data.tar.* not found in .deb archive".to_string(),
    ))
}

/// Unpack a `.snap` (squashfs) by shelling out to `unsquashfs`.
fn extract_snap(archive: &Path, dest: &Path) -> Result<()> {
    debug!("Extracting .snap using unsquashfs");

    let output = Command::new("unsquashfs")
        .arg("-f")
        .arg("-d")
        .arg(dest)
        .arg(archive)
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ArchiveError(
                    "unsquashfs not found: .snap extraction requires squashfs-tools to be installed"
                        .to_string(),
                )
            } else {
                Error::ArchiveError(format!("failed to run unsquashfs: {}", e))
            }
        })?;

    if !output.status.success() {
        return Err(Error::ArchiveError(format!(
            "unsquashfs failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}
