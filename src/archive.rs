//! Content bundle extraction.
//!
//! The downloaded bundle is written to `manifest.zip` in the destination
//! directory and then unpacked next to it, recreating the archive's directory
//! structure. Entry contents are copied byte for byte; the only integrity
//! check is the CRC the ZIP reader verifies while streaming.
//!
//! Entries whose names would resolve outside the destination directory, or
//! onto the archive itself or another reserved file such as the lookup store,
//! are rejected before anything is written.

use std::fs::{self, OpenOptions};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ManifestError;

/// File name the bundle is persisted under before extraction.
pub const ARCHIVE_FILE_NAME: &str = "manifest.zip";

/// Result of unpacking a bundle.
#[derive(Debug, Clone)]
pub struct Extracted {
    /// Where the raw bundle was written.
    pub archive_path: PathBuf,
    /// Every regular file written, in archive order.
    pub files: Vec<PathBuf>,
    /// Directories created for directory entries.
    pub directories: Vec<PathBuf>,
}

impl Extracted {
    /// Finds the extracted file named `file_name`, falling back to the only
    /// extracted file when the archive held exactly one.
    pub fn locate(&self, file_name: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name))
            .or(match self.files.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .map(PathBuf::as_path)
    }

    /// Removes the archive and every extracted file. Directories are left.
    pub fn remove(&self) -> Result<(), ManifestError> {
        for path in std::iter::once(&self.archive_path).chain(self.files.iter()) {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ManifestError::io(path, e)),
            }
        }
        Ok(())
    }
}

/// Persists `bundle` as `<dest>/manifest.zip` and unpacks it into `dest`.
///
/// `reserved` lists files no entry may overwrite; the archive path is always
/// reserved. Blocking; call through `spawn_blocking` from async code.
pub fn extract(bundle: &[u8], dest: &Path, reserved: &[&Path]) -> Result<Extracted, ManifestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle))?;

    fs::create_dir_all(dest).map_err(|e| ManifestError::io(dest, e))?;
    let archive_path = dest.join(ARCHIVE_FILE_NAME);

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ManifestError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);
        if let Some(hit) = std::iter::once(archive_path.as_path())
            .chain(reserved.iter().copied())
            .find(|r| same_location(&out_path, r))
        {
            return Err(ManifestError::ReservedEntry {
                entry: entry.name().to_string(),
                path: hit.to_path_buf(),
            });
        }
    }

    fs::write(&archive_path, bundle).map_err(|e| ManifestError::io(&archive_path, e))?;

    let mut files = Vec::new();
    let mut directories = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ManifestError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);
        let mode = entry.unix_mode();

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| ManifestError::io(&out_path, e))?;
            apply_mode(&out_path, mode, 0o700)?;
            debug!(path = %out_path.display(), "created directory");
            directories.push(out_path);
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ManifestError::io(parent, e))?;
        }

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&out_path)
            .map_err(|e| ManifestError::io(&out_path, e))?;
        let written = io::copy(&mut entry, &mut out).map_err(|e| ManifestError::io(&out_path, e))?;
        apply_mode(&out_path, mode, 0o600)?;

        debug!(path = %out_path.display(), bytes = written, "extracted file");
        files.push(out_path);
    }

    info!(
        archive = %archive_path.display(),
        files = files.len(),
        directories = directories.len(),
        "content bundle extracted"
    );

    Ok(Extracted {
        archive_path,
        files,
        directories,
    })
}

/// Whether `a` and `b` name the same file, comparing canonical parents when
/// both exist.
fn same_location(a: &Path, b: &Path) -> bool {
    if a.file_name() != b.file_name() {
        return false;
    }
    let parent = |p: &Path| p.parent().and_then(|d| d.canonicalize().ok());
    match (parent(a), parent(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Applies the entry's unix permissions, always keeping the owner bits in
/// `owner_floor` so a later run can overwrite the file.
#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>, owner_floor: u32) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        let perms = fs::Permissions::from_mode((mode & 0o7777) | owner_floor);
        fs::set_permissions(path, perms).map_err(|e| ManifestError::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>, _owner_floor: u32) -> Result<(), ManifestError> {
    Ok(())
}
