//! Photo lifecycle: ingestion, deletion and purge.
//!
//! These operations couple the record store and the image store under the
//! write-after-confirm protocol: on ingestion the file is staged, the row
//! is committed, then the file is renamed into its final path; on deletion
//! the row goes first and the file second. A crash between the two steps
//! leaves only a prefixed temp file (cleaned at startup) or an
//! already-logged missing file, never a row/file mismatch in the forward
//! direction.

pub mod metadata;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::db::records::DateConfidence;
use crate::db::{Database, Photo};
use crate::error::Result;
use crate::images::ImageStore;

pub use metadata::ExtractedDate;

/// One raw image handed over by the caller (the interactive surface).
#[derive(Debug, Clone)]
pub struct PhotoInput {
    pub bytes: Vec<u8>,
    /// Original file name, used for its extension if present.
    pub original_name: Option<String>,
    /// Explicit capture date, bypassing extraction.
    pub taken_at_override: Option<NaiveDateTime>,
    /// Free-text caption stored on the row.
    pub description: Option<String>,
}

impl PhotoInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            original_name: None,
            taken_at_override: None,
            description: None,
        }
    }
}

/// Add a batch of photos to a tree.
///
/// Capture dates are extracted independently per image and the batch is
/// sorted by the resulting timestamps, not upload order, before any row is
/// written; chronological position therefore never depends on the order
/// the files arrived in. Returns the created photos with their extracted
/// dates and confidence flags so the caller can offer low-confidence dates
/// for manual correction.
pub fn add_photos(
    db: &Database,
    images: &ImageStore,
    tree_id: i64,
    inputs: Vec<PhotoInput>,
) -> Result<Vec<Photo>> {
    let dated = inputs
        .into_iter()
        .map(|input| {
            let extracted = match input.taken_at_override {
                Some(taken_at) => ExtractedDate {
                    taken_at,
                    confidence: DateConfidence::Manual,
                },
                None => metadata::extract_from_bytes(&input.bytes),
            };
            (input, extracted)
        })
        .collect();
    ingest_batch(db, images, tree_id, dated)
}

/// Add a batch of photos from files on disk. Same semantics as
/// [`add_photos`], but the extraction chain can fall back to each file's
/// modification time, which raw bytes no longer carry.
pub fn add_photo_files(
    db: &Database,
    images: &ImageStore,
    tree_id: i64,
    paths: &[std::path::PathBuf],
) -> Result<Vec<Photo>> {
    let mut dated = Vec::with_capacity(paths.len());
    for path in paths {
        let extracted = metadata::extract_from_path(path);
        let input = PhotoInput {
            bytes: std::fs::read(path)?,
            original_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            taken_at_override: None,
            description: None,
        };
        dated.push((input, extracted));
    }
    ingest_batch(db, images, tree_id, dated)
}

fn ingest_batch(
    db: &Database,
    images: &ImageStore,
    tree_id: i64,
    mut dated: Vec<(PhotoInput, ExtractedDate)>,
) -> Result<Vec<Photo>> {
    let tree = db.get_tree(tree_id)?;
    dated.sort_by_key(|(_, extracted)| extracted.taken_at);

    let mut created = Vec::with_capacity(dated.len());
    for (input, extracted) in dated {
        let extension = pick_extension(&input);
        let file_name = images.allocate_name(tree.tree_number, &extension);

        // Stage, commit the row, then rename into the final path.
        let staged = images.stage(&input.bytes)?;
        let photo = db.insert_photo(
            tree_id,
            &file_name,
            extracted.taken_at,
            extracted.confidence,
            input.description.as_deref(),
        )?;
        if let Err(e) = images.commit(staged, &file_name) {
            // The row exists but the file never reached its final path;
            // take the row back out so no photo references a missing file.
            warn!(photo_id = photo.id, "file commit failed, rolling back row");
            let _ = db.delete_photo_row(photo.id);
            return Err(e);
        }

        info!(
            photo_id = photo.id,
            tree_number = tree.tree_number,
            confidence = extracted.confidence.as_str(),
            "photo ingested"
        );
        created.push(photo);
    }
    Ok(created)
}

/// Delete one photo: row first, then the physical file.
pub fn delete_photo(db: &Database, images: &ImageStore, photo_id: i64) -> Result<()> {
    let file_name = db.delete_photo_row(photo_id)?;
    images.remove(&file_name)
}

/// Explicitly purge a tree's photos: every photo row is deleted and every
/// file removed. Status transitions never do this implicitly.
pub fn purge_tree(db: &Database, images: &ImageStore, tree_id: i64) -> Result<usize> {
    let file_names = db.purge_tree_photos(tree_id)?;
    let count = file_names.len();
    for file_name in file_names {
        images.remove(&file_name)?;
    }
    info!(tree_id, count, "purged tree photos");
    Ok(count)
}

/// Pick a stored extension: the original file name's extension when given,
/// otherwise sniffed from the bytes.
fn pick_extension(input: &PhotoInput) -> String {
    if let Some(name) = &input.original_name {
        if let Some(ext) = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
        {
            return ext.to_lowercase();
        }
    }
    match image::guess_format(&input.bytes) {
        Ok(format) => format
            .extensions_str()
            .first()
            .map(|s| (*s).to_string())
            .unwrap_or_else(|| "bin".to_string()),
        Err(_) => "bin".to_string(),
    }
}
