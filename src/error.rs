//! Error taxonomy for the collection store and the archive subsystem.
//!
//! Validation errors reject a single write and name the violated rule;
//! integrity errors abort an export/import before any live state is touched
//! and name the offending record or file. I/O and codec failures pass
//! through so the caller can retry the whole operation.

use std::path::PathBuf;

use crate::db::records::TreeStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Validation: rejected writes, nothing partial persisted.
    #[error("tree number {0} is already assigned")]
    DuplicateTreeNumber(i64),

    #[error("species \"{name}\" is still referenced by tree #{tree_number} \"{tree_name}\"")]
    SpeciesInUse {
        name: String,
        tree_number: i64,
        tree_name: String,
    },

    #[error("tree {0} not found")]
    TreeNotFound(i64),

    #[error("species {0} not found")]
    SpeciesNotFound(i64),

    #[error("photo {0} not found")]
    PhotoNotFound(i64),

    #[error("reminder {0} not found")]
    ReminderNotFound(i64),

    #[error("photo {photo_id} belongs to tree {actual}, not tree {expected}")]
    PhotoTreeMismatch {
        photo_id: i64,
        expected: i64,
        actual: i64,
    },

    #[error("linked {kind} {id} belongs to a different tree")]
    CrossTreeLink { kind: &'static str, id: i64 },

    #[error("tree #{tree_number} cannot move from {from} to {to}")]
    InvalidTransition {
        tree_number: i64,
        from: TreeStatus,
        to: TreeStatus,
    },

    // Integrity: export/import aborted before touching live state.
    #[error("image file missing for photo {photo_id}: {}", path.display())]
    MissingPhotoFile { photo_id: i64, path: PathBuf },

    #[error("archive entry missing for photo {photo_id}: {name}")]
    MissingArchiveEntry { photo_id: i64, name: String },

    #[error(
        "checksum mismatch for photo {photo_id} ({name}): manifest {expected}, archive {actual}"
    )]
    ChecksumMismatch {
        photo_id: i64,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("row count mismatch for {entity}: manifest declares {declared}, archive holds {actual}")]
    RowCountMismatch {
        entity: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("unsupported archive schema \"{0}\"")]
    UnsupportedSchema(String),

    #[error("merge import is not implemented; use replace mode")]
    MergeUnsupported,

    // Transport: fatal for the current operation, never retried internally.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
