//! Portable collection archives.
//!
//! An archive is a single zip holding `records.json` (the full relational
//! snapshot), one entry per photo under `images/`, and a `manifest.json`
//! with row counts and a SHA-256 per image. The manifest is written last so
//! a truncated writer run never produces something that passes validation.
//! Export and import live in their own submodules; everything they share
//! (entry layout, manifest schema, checksumming) is here.

mod export;
mod import;

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::RowCounts;
use crate::error::{Error, Result};

pub use export::{export_archive, ExportSummary};
pub use import::{import_archive, ImportMode, ImportSummary};

pub(crate) const RECORDS_ENTRY: &str = "records.json";
pub(crate) const MANIFEST_ENTRY: &str = "manifest.json";
pub(crate) const IMAGES_DIR: &str = "images";

/// Versioned manifest. The `schema` tag is the compatibility gate: an
/// importer that does not know the tag refuses the archive outright
/// instead of guessing at its layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum Manifest {
    #[serde(rename = "v1")]
    V1(ManifestV1),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestV1 {
    pub exported_at: String,
    pub app_version: String,
    pub counts: RowCounts,
    pub files: Vec<ImageEntry>,
}

/// One image file as declared by the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub photo_id: i64,
    /// Entry name inside the archive, `images/<photo_id>.<ext>`.
    pub name: String,
    pub sha256: String,
    pub size: u64,
}

/// Archive entry name for a photo. Keyed by photo id, not the store-relative
/// file name, so the layout inside the archive is stable regardless of how
/// the image store organizes its directories.
pub(crate) fn image_entry_name(photo_id: i64, file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("{IMAGES_DIR}/{photo_id}.{ext}")
}

/// Parse a manifest, mapping an unknown `schema` tag to
/// [`Error::UnsupportedSchema`] with the tag named.
pub(crate) fn parse_manifest(raw: &[u8]) -> Result<Manifest> {
    match serde_json::from_slice::<Manifest>(raw) {
        Ok(manifest) => Ok(manifest),
        Err(e) => {
            // Distinguish "unknown version" from plain corruption
            let value: serde_json::Value = serde_json::from_slice(raw)?;
            match value.get("schema").and_then(|v| v.as_str()) {
                Some(tag) => Err(Error::UnsupportedSchema(tag.to_string())),
                None => Err(e.into()),
            }
        }
    }
}

/// Copy a reader into a writer while streaming SHA-256 over the bytes in
/// the same pass. Returns the lowercase hex digest and the byte count.
pub(crate) fn copy_hashed<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
