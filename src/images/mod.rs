//! Physical storage for photo files.
//!
//! Every photo row maps to one file under the store root, at a tree-scoped
//! relative path generated before the row is inserted. The write protocol
//! is scoped acquisition: bytes land in a temp file first and are renamed
//! into the final path only after the photo row committed, so a crash can
//! orphan at most a prefixed temp file, never a row without a file or a
//! final-path file without a row. Deletion runs the other way around: row
//! first, then file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;

/// Prefix for single-file staging temps in the store root.
const TMP_PREFIX: &str = ".shohin-tmp_";
/// Prefix for import staging directories in the store root.
const STAGING_PREFIX: &str = ".shohin-import_";
/// Suffix for partially written archives (next to the archive destination).
pub const PARTIAL_SUFFIX: &str = ".shohin-partial";

/// Generate a name unique within the store root. Uses a process-global
/// atomic counter so concurrent callers within the same second cannot
/// collide.
fn unique_stamp() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let timestamp = Utc::now().timestamp();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{timestamp}_{seq}")
}

/// A written-but-uncommitted image file. Dropped without
/// [`ImageStore::commit`], the temp file is removed.
#[derive(Debug)]
pub struct StagedImage {
    path: Option<PathBuf>,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    fn take(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = fs::remove_file(path);
        }
    }
}

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a stored relative file name.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Allocate a fresh tree-scoped relative file name, e.g.
    /// `tree_0001/1693400000_0.jpg`. Collision-free by construction and
    /// additionally backed by the UNIQUE constraint on `photos.file_name`.
    pub fn allocate_name(&self, tree_number: i64, extension: &str) -> String {
        format!("tree_{tree_number:04}/{}.{extension}", unique_stamp())
    }

    /// Write bytes to a temp file inside the store root. The result must be
    /// passed to [`ImageStore::commit`] after the owning row committed.
    pub fn stage(&self, bytes: &[u8]) -> Result<StagedImage> {
        let path = self.root.join(format!("{TMP_PREFIX}{}", unique_stamp()));
        let mut file = fs::File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(StagedImage { path: Some(path) })
    }

    /// Move a staged file into its final path. Only called after the photo
    /// row is committed.
    pub fn commit(&self, staged: StagedImage, file_name: &str) -> Result<()> {
        let temp_path = staged.take();
        self.install(&temp_path, file_name)
    }

    /// Move an already-written file into its final path under the root.
    /// Rename first; fall back to copy + delete for cross-filesystem
    /// sources.
    pub fn install(&self, source: &Path, file_name: &str) -> Result<()> {
        let final_path = self.path_for(file_name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(source, &final_path) {
            Ok(()) => Ok(()),
            Err(_) => {
                fs::copy(source, &final_path)?;
                fs::remove_file(source)?;
                Ok(())
            }
        }
    }

    /// Remove the physical file for a photo whose row is already gone.
    /// A file that is already absent is not an error.
    pub fn remove(&self, file_name: &str) -> Result<()> {
        let path = self.path_for(file_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("image file already missing: {}", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a staging directory for an import run.
    pub fn create_staging_dir(&self) -> Result<PathBuf> {
        let path = self.root.join(format!("{STAGING_PREFIX}{}", unique_stamp()));
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove temp artifacts left behind by an interrupted export or
    /// import. Called on startup; an interrupted run is never resumed.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TMP_PREFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            } else if name.starts_with(STAGING_PREFIX) {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("removed {removed} stale staging artifact(s)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_and_commit() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();

        let staged = store.stage(b"jpeg bytes").unwrap();
        let temp_path = staged.path().to_path_buf();
        assert!(temp_path.exists());

        let name = store.allocate_name(1, "jpg");
        assert!(name.starts_with("tree_0001/"));
        store.commit(staged, &name).unwrap();

        assert!(!temp_path.exists());
        assert_eq!(fs::read(store.path_for(&name)).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_uncommitted_stage_is_discarded() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();

        let temp_path = {
            let staged = store.stage(b"abandoned").unwrap();
            staged.path().to_path_buf()
        };
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_allocate_name_is_unique() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let a = store.allocate_name(1, "jpg");
        let b = store.allocate_name(1, "jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        store.remove("tree_0001/gone.jpg").unwrap();
    }

    #[test]
    fn test_cleanup_stale_removes_only_prefixed_artifacts() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();

        // Simulated crash leftovers
        fs::write(store.root().join(".shohin-tmp_123_0"), b"x").unwrap();
        fs::create_dir(store.root().join(".shohin-import_123_1")).unwrap();
        // Committed photo, must survive
        fs::create_dir_all(store.root().join("tree_0001")).unwrap();
        fs::write(store.root().join("tree_0001/keep.jpg"), b"k").unwrap();

        let removed = store.cleanup_stale().unwrap();
        assert_eq!(removed, 2);
        assert!(store.path_for("tree_0001/keep.jpg").exists());
    }
}
