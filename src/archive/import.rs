//! Archive import.
//!
//! Validation and extraction happen entirely against a staging directory:
//! manifest schema, row counts, entry presence and checksums are all
//! verified before a single live row or file is touched. Only after every
//! check passes does the importer enter its exclusive write section, wipe
//! the database, reinstall the snapshot, and swap the image files. A
//! rejected archive leaves the collection exactly as it was.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::info;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{
    copy_hashed, image_entry_name, parse_manifest, Manifest, ManifestV1, MANIFEST_ENTRY,
    RECORDS_ENTRY,
};
use crate::db::{Database, RowCounts, Snapshot};
use crate::error::{Error, Result};
use crate::images::ImageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Wipe the current collection and install the archive verbatim.
    Replace,
    /// Reconciling an archive with live records is not implemented;
    /// selecting this mode fails before anything is read.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub trees: usize,
    pub photos: usize,
}

/// Import a collection archive.
pub fn import_archive(
    db: &Database,
    images: &ImageStore,
    path: &Path,
    mode: ImportMode,
) -> Result<ImportSummary> {
    if mode == ImportMode::Merge {
        return Err(Error::MergeUnsupported);
    }

    let mut zip = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let Manifest::V1(manifest) = parse_manifest(&read_entry(&mut zip, MANIFEST_ENTRY)?)?;
    let snapshot: Snapshot = serde_json::from_slice(&read_entry(&mut zip, RECORDS_ENTRY)?)?;

    verify_counts(&manifest, &snapshot)?;

    // Extract every image into staging, verifying checksums as we go.
    // Nothing live has been touched yet; any failure just drops staging.
    let staging = images.create_staging_dir()?;
    let staged = match stage_images(&mut zip, &manifest, &snapshot, &staging) {
        Ok(staged) => staged,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    // Point of no return: the replace reports which photo files its wipe
    // orphaned, read under the same lock, so nothing ingested concurrently
    // can slip between a separate snapshot and the wipe.
    let old_files = db.replace_all(&snapshot)?;
    for file_name in &old_files {
        images.remove(file_name)?;
    }
    for (file_name, staged_path) in &staged {
        images.install(staged_path, file_name)?;
    }
    fs::remove_dir_all(&staging)?;

    info!(
        path = %path.display(),
        trees = snapshot.trees.len(),
        photos = snapshot.photos.len(),
        "archive imported"
    );
    Ok(ImportSummary {
        trees: snapshot.trees.len(),
        photos: snapshot.photos.len(),
    })
}

fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = zip.by_name(name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Manifest row counts must match the snapshot exactly, per entity, and
/// the declared file list must cover the snapshot's photos one to one.
fn verify_counts(manifest: &ManifestV1, snapshot: &Snapshot) -> Result<()> {
    let declared = manifest.counts;
    let actual = snapshot.counts();
    let pairs: [(&'static str, usize, usize); 5] = [
        ("species", declared.species, actual.species),
        ("trees", declared.trees, actual.trees),
        ("photos", declared.photos, actual.photos),
        ("work_entries", declared.work_entries, actual.work_entries),
        ("reminders", declared.reminders, actual.reminders),
    ];
    for (entity, declared, actual) in pairs {
        if declared != actual {
            return Err(Error::RowCountMismatch {
                entity,
                declared,
                actual,
            });
        }
    }
    if manifest.files.len() != snapshot.photos.len() {
        return Err(Error::RowCountMismatch {
            entity: "image files",
            declared: manifest.files.len(),
            actual: snapshot.photos.len(),
        });
    }
    Ok(())
}

/// Extract each photo's archive entry into the staging directory, checking
/// presence and SHA-256 against the manifest. Returns the store-relative
/// target name and staged path per photo.
fn stage_images<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    manifest: &ManifestV1,
    snapshot: &Snapshot,
    staging: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let mut staged = Vec::with_capacity(snapshot.photos.len());
    for photo in &snapshot.photos {
        let declared = manifest
            .files
            .iter()
            .find(|f| f.photo_id == photo.id)
            .ok_or_else(|| Error::MissingArchiveEntry {
                photo_id: photo.id,
                name: image_entry_name(photo.id, &photo.file_name),
            })?;

        let mut entry = match zip.by_name(&declared.name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(Error::MissingArchiveEntry {
                    photo_id: photo.id,
                    name: declared.name.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let staged_path = staging.join(photo.id.to_string());
        let mut out = File::create(&staged_path)?;
        let (actual, _) = copy_hashed(&mut entry, &mut out)?;
        out.sync_all()?;
        if actual != declared.sha256 {
            return Err(Error::ChecksumMismatch {
                photo_id: photo.id,
                name: declared.name.clone(),
                expected: declared.sha256.clone(),
                actual,
            });
        }
        staged.push((photo.file_name.clone(), staged_path));
    }
    Ok(staged)
}
