//! Archive export.
//!
//! The exporter snapshots the database once, then writes the archive to a
//! temp path next to the destination and renames it into place only after
//! the manifest entry is committed. Any failure, including a photo row
//! whose file is missing on disk, removes the temp file and leaves no
//! archive at the destination.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    copy_hashed, image_entry_name, ImageEntry, Manifest, ManifestV1, IMAGES_DIR, MANIFEST_ENTRY,
    RECORDS_ENTRY,
};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::images::{ImageStore, PARTIAL_SUFFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub trees: usize,
    pub photos: usize,
    pub bytes: u64,
}

/// Export the whole collection to a single archive at `dest`.
pub fn export_archive(db: &Database, images: &ImageStore, dest: &Path) -> Result<ExportSummary> {
    let snapshot = db.snapshot()?;

    let mut partial = dest.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = write_archive(&snapshot, images, &partial)
        .and_then(|files| fs::rename(&partial, dest).map(|()| files).map_err(Error::Io));
    let files = match result {
        Ok(files) => files,
        Err(e) => {
            // Nothing ever scans for partials next to the destination, so
            // failure paths must not leave one behind
            if let Err(rm) = fs::remove_file(&partial) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!("could not remove partial archive: {rm}");
                }
            }
            return Err(e);
        }
    };

    let bytes = fs::metadata(dest)?.len();

    info!(
        path = %dest.display(),
        trees = snapshot.trees.len(),
        photos = files.len(),
        bytes,
        "archive exported"
    );
    Ok(ExportSummary {
        path: dest.to_path_buf(),
        trees: snapshot.trees.len(),
        photos: files.len(),
        bytes,
    })
}

fn write_archive(
    snapshot: &crate::db::Snapshot,
    images: &ImageStore,
    path: &Path,
) -> Result<Vec<ImageEntry>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = ZipWriter::new(File::create(path)?);

    // Records compress well; image bytes are already compressed, store them.
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file(RECORDS_ENTRY, deflated)?;
    writer.write_all(&serde_json::to_vec_pretty(snapshot)?)?;

    writer.add_directory(IMAGES_DIR, stored)?;

    // Strictly the snapshot's photo set, never a directory listing
    let mut files = Vec::with_capacity(snapshot.photos.len());
    for photo in &snapshot.photos {
        let source = images.path_for(&photo.file_name);
        let file = File::open(&source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::MissingPhotoFile {
                    photo_id: photo.id,
                    path: source.clone(),
                }
            } else {
                e.into()
            }
        })?;

        let name = image_entry_name(photo.id, &photo.file_name);
        writer.start_file(name.as_str(), stored)?;
        let mut reader = BufReader::new(file);
        let (sha256, size) = copy_hashed(&mut reader, &mut writer)?;
        files.push(ImageEntry {
            photo_id: photo.id,
            name,
            sha256,
            size,
        });
    }

    let manifest = Manifest::V1(ManifestV1 {
        exported_at: Utc::now().to_rfc3339(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        counts: snapshot.counts(),
        files: files.clone(),
    });
    writer.start_file(MANIFEST_ENTRY, deflated)?;
    writer.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    writer.finish()?;

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::{seed_tree, test_db};
    use crate::photos::{add_photos, PhotoInput};
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn photo_input(bytes: &[u8], y: i32, m: u32) -> PhotoInput {
        PhotoInput {
            bytes: bytes.to_vec(),
            original_name: Some("p.jpg".to_string()),
            taken_at_override: Some(
                chrono::NaiveDate::from_ymd_opt(y, m, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            ),
            description: None,
        }
    }

    #[test]
    fn test_export_writes_records_images_and_manifest() {
        let db = test_db();
        let dir = tempdir().unwrap();
        let images = ImageStore::open(dir.path().join("images")).unwrap();
        let tree = seed_tree(&db, "Juniper", "Shimpaku #1");
        let photos = add_photos(
            &db,
            &images,
            tree.id,
            vec![photo_input(b"winter", 2023, 1), photo_input(b"summer", 2023, 6)],
        )
        .unwrap();

        let dest = dir.path().join("collection.zip");
        let summary = export_archive(&db, &images, &dest).unwrap();
        assert_eq!(summary.trees, 1);
        assert_eq!(summary.photos, 2);
        assert!(dest.exists());

        let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut raw = Vec::new();
        zip.by_name(MANIFEST_ENTRY)
            .unwrap()
            .read_to_end(&mut raw)
            .unwrap();
        let Manifest::V1(manifest) = crate::archive::parse_manifest(&raw).unwrap();
        assert_eq!(manifest.counts.photos, 2);
        assert_eq!(manifest.files.len(), 2);
        for photo in &photos {
            let entry = manifest
                .files
                .iter()
                .find(|f| f.photo_id == photo.id)
                .unwrap();
            let mut bytes = Vec::new();
            zip.by_name(&entry.name)
                .unwrap()
                .read_to_end(&mut bytes)
                .unwrap();
            assert_eq!(bytes.len() as u64, entry.size);
        }

        let mut raw = Vec::new();
        zip.by_name(RECORDS_ENTRY)
            .unwrap()
            .read_to_end(&mut raw)
            .unwrap();
        let snapshot: crate::db::Snapshot = serde_json::from_slice(&raw).unwrap();
        assert_eq!(snapshot, db.snapshot().unwrap());
    }

    #[test]
    fn test_missing_file_aborts_export_without_artifact() {
        let db = test_db();
        let dir = tempdir().unwrap();
        let images = ImageStore::open(dir.path().join("images")).unwrap();
        let tree = seed_tree(&db, "Juniper", "J");
        let photos = add_photos(&db, &images, tree.id, vec![photo_input(b"x", 2023, 1)]).unwrap();

        // File vanishes between snapshot and copy
        fs::remove_file(images.path_for(&photos[0].file_name)).unwrap();

        let dest = dir.path().join("collection.zip");
        let err = export_archive(&db, &images, &dest).unwrap_err();
        match err {
            Error::MissingPhotoFile { photo_id, .. } => assert_eq!(photo_id, photos[0].id),
            other => panic!("expected MissingPhotoFile, got {other:?}"),
        }
        assert!(!dest.exists());
        // No partial archive left behind either
        assert!(fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .all(|name| name == "images"));
    }

    #[test]
    fn test_failed_final_rename_removes_partial() {
        let db = test_db();
        let dir = tempdir().unwrap();
        let images = ImageStore::open(dir.path().join("images")).unwrap();
        let tree = seed_tree(&db, "Juniper", "J");
        add_photos(&db, &images, tree.id, vec![photo_input(b"x", 2023, 1)]).unwrap();

        // A directory at the destination makes the final rename fail
        let dest = dir.path().join("collection.zip");
        fs::create_dir(&dest).unwrap();

        assert!(export_archive(&db, &images, &dest).is_err());

        let mut partial = dest.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        assert!(!PathBuf::from(partial).exists());
    }
}
