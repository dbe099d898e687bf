use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use url::Url;

use crate::error::MirrorError;
use crate::path_mapper::map_path;

/// Owns the mirror root on disk.
///
/// Every write goes through a temporary file that is renamed into place, so a
/// destination path is either absent or complete.
#[derive(Clone, Debug)]
pub struct FileManager {
    base_dir: PathBuf,
    staging_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path, staging_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create base directory: {:?}", base_dir))?;
        let staging_dir = staging_dir.to_path_buf();
        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("Failed to create staging directory: {:?}", staging_dir))?;

        Ok(Self { base_dir, staging_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn local_path(&self, url: &Url, site: &Url) -> PathBuf {
        map_path(url, site, &self.base_dir)
    }

    /// True when a non-empty file is already at `path`.
    pub async fn has_content(&self, path: &Path) -> Result<bool, MirrorError> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_file() && metadata.len() > 0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::io(path, e)),
        }
    }

    /// Creates an empty staging file for a download.
    pub fn stage(&self) -> Result<NamedTempFile, MirrorError> {
        NamedTempFile::new_in(&self.staging_dir).map_err(|e| MirrorError::io(&self.staging_dir, e))
    }

    /// Moves a staged file to `dest`, creating parent directories.
    ///
    /// Tries a rename first. If that fails (typically because staging and the
    /// mirror are on different filesystems) the content is copied into place
    /// with [`copy_into_place`].
    pub fn place(&self, staged: NamedTempFile, dest: &Path) -> Result<(), MirrorError> {
        ensure_parent(dest)?;
        match staged.persist(dest) {
            Ok(_) => Ok(()),
            Err(e) => copy_into_place(e.file, dest),
        }
    }

    /// Writes `content` to `dest` through a temporary sibling file.
    pub fn write_file(&self, dest: &Path, content: &[u8]) -> Result<(), MirrorError> {
        let parent = ensure_parent(dest)?;
        let mut temp = NamedTempFile::new_in(&parent).map_err(|e| MirrorError::io(&parent, e))?;
        temp.write_all(content).map_err(|e| MirrorError::io(dest, e))?;
        temp.persist(dest).map_err(|e| MirrorError::io(dest, e.error))?;
        Ok(())
    }
}

/// Copies a staged file into a temp file next to `dest`, renames that into
/// place, then deletes the staged file. `dest` is never seen half-written.
fn copy_into_place(staged: NamedTempFile, dest: &Path) -> Result<(), MirrorError> {
    let parent = ensure_parent(dest)?;
    let mut sibling = NamedTempFile::new_in(&parent).map_err(|e| MirrorError::io(&parent, e))?;
    let mut source = fs::File::open(staged.path()).map_err(|e| MirrorError::io(staged.path(), e))?;
    io::copy(&mut source, sibling.as_file_mut()).map_err(|e| MirrorError::io(dest, e))?;
    sibling.as_file().sync_all().map_err(|e| MirrorError::io(dest, e))?;
    sibling.persist(dest).map_err(|e| MirrorError::io(dest, e.error))?;
    staged.close().map_err(|e| MirrorError::io(dest, e))
}

fn ensure_parent(dest: &Path) -> Result<PathBuf, MirrorError> {
    let parent = dest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| MirrorError::io(&parent, e))?;
    Ok(parent)
}
