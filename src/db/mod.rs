//! SQLite record store.
//!
//! All writes are transactional: an operation that violates an invariant
//! (duplicate tree number, species still in use, a second primary photo)
//! fails as a unit and leaves no partial row behind. The connection sits
//! behind a mutex so the importer's full-replace can hold a true exclusive
//! write section.

pub mod records;
mod schema;
mod snapshot;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
pub use records::{DateConfidence, Photo, Reminder, Species, Tree, TreeStatus, WorkEntry};
pub use schema::{MIGRATIONS, SCHEMA};
pub use snapshot::{RowCounts, Snapshot};

use records::{fmt_date, fmt_datetime, now};

const TREE_COLS: &str =
    "id, tree_number, name, species_id, special_note, status, acquired_on, origin_on, created_at";
const PHOTO_COLS: &str =
    "id, tree_id, file_name, taken_at, date_confidence, is_primary, description, created_at";
const WORK_COLS: &str =
    "id, tree_id, performed_at, description, trunk_width_cm, photo_id, reminder_id, created_at";
const REMINDER_COLS: &str = "id, tree_id, due_on, message, completed, notified, created_at";

/// Fields for a new tree; the tree number is assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewTree {
    pub name: String,
    pub species_id: i64,
    pub special_note: Option<String>,
    pub acquired_on: Option<NaiveDate>,
    pub origin_on: Option<NaiveDate>,
}

/// Mutable tree fields for an edit. Tree number and status are not
/// editable here; status changes go through [`Database::transition_tree`].
#[derive(Debug, Clone, Default)]
pub struct TreeUpdate {
    pub name: String,
    pub species_id: i64,
    pub special_note: Option<String>,
    pub acquired_on: Option<NaiveDate>,
    pub origin_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct NewWorkEntry {
    pub tree_id: i64,
    pub performed_at: NaiveDateTime,
    pub description: String,
    pub trunk_width_cm: Option<f64>,
    pub photo_id: Option<i64>,
    pub reminder_id: Option<i64>,
}

pub struct Database {
    conn: Mutex<Connection>,
}

fn is_unique_violation(e: &rusqlite::Error, needle: &str) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(needle)
    )
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            if let Err(e) = conn.execute(migration, []) {
                // Additive column migrations; the column already existing
                // is the only failure that may be ignored
                let already_applied = matches!(
                    &e,
                    rusqlite::Error::SqliteFailure(_, Some(msg))
                        if msg.contains("duplicate column name")
                );
                if !already_applied {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Species
    // ========================================================================

    /// Get a species by case-insensitive name, creating it if absent.
    pub fn get_or_create_species(&self, name: &str) -> Result<Species> {
        let name = name.trim();
        let folded = name.to_lowercase();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT id, name, created_at FROM species WHERE name_folded = ?",
                [&folded],
                records::Species::from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        if let Some(species) = existing {
            return Ok(species);
        }

        let created_at = now();
        tx.execute(
            "INSERT INTO species (name, name_folded, created_at) VALUES (?, ?, ?)",
            params![name, folded, fmt_datetime(created_at)],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Species {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    pub fn list_species(&self) -> Result<Vec<Species>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM species ORDER BY name_folded")?;
        let rows = stmt
            .query_map([], records::Species::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Species names for autocomplete, sorted case-insensitively.
    pub fn species_names(&self) -> Result<Vec<String>> {
        Ok(self.list_species()?.into_iter().map(|s| s.name).collect())
    }

    /// Delete a species. Rejected while any tree still references it,
    /// naming the dependent tree.
    pub fn delete_species(&self, species_id: i64) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let name: String = tx
            .query_row(
                "SELECT name FROM species WHERE id = ?",
                [species_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::SpeciesNotFound(species_id),
                e => e.into(),
            })?;

        let dependent = tx
            .query_row(
                "SELECT tree_number, name FROM trees WHERE species_id = ? ORDER BY tree_number LIMIT 1",
                [species_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        if let Some((tree_number, tree_name)) = dependent {
            return Err(Error::SpeciesInUse {
                name,
                tree_number,
                tree_name,
            });
        }

        tx.execute("DELETE FROM species WHERE id = ?", [species_id])?;
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Trees
    // ========================================================================

    /// Create a tree, assigning the next tree number from the monotonic
    /// counter. The counter only ever moves forward, so numbers are never
    /// reused even after a tree is deleted.
    pub fn create_tree(&self, new: &NewTree) -> Result<Tree> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let species_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM species WHERE id = ?)",
            [new.species_id],
            |row| row.get(0),
        )?;
        if !species_exists {
            return Err(Error::SpeciesNotFound(new.species_id));
        }

        let tree_number: i64 = tx.query_row(
            "SELECT value FROM counters WHERE name = 'next_tree_number'",
            [],
            |row| row.get(0),
        )?;
        let created_at = now();
        tx.execute(
            "INSERT INTO trees (tree_number, name, species_id, special_note, status, acquired_on, origin_on, created_at)
             VALUES (?, ?, ?, ?, 'active', ?, ?, ?)",
            params![
                tree_number,
                new.name,
                new.species_id,
                new.special_note,
                new.acquired_on.map(fmt_date),
                new.origin_on.map(fmt_date),
                fmt_datetime(created_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e, "trees.tree_number") {
                Error::DuplicateTreeNumber(tree_number)
            } else {
                e.into()
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE counters SET value = value + 1 WHERE name = 'next_tree_number'",
            [],
        )?;
        tx.commit()?;

        Ok(Tree {
            id,
            tree_number,
            name: new.name.clone(),
            species_id: new.species_id,
            special_note: new.special_note.clone(),
            status: TreeStatus::Active,
            acquired_on: new.acquired_on,
            origin_on: new.origin_on,
            created_at,
        })
    }

    pub fn get_tree(&self, tree_id: i64) -> Result<Tree> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {TREE_COLS} FROM trees WHERE id = ?"),
            [tree_id],
            records::Tree::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::TreeNotFound(tree_id),
            e => e.into(),
        })
    }

    pub fn get_tree_by_number(&self, tree_number: i64) -> Result<Option<Tree>> {
        let conn = self.lock();
        match conn.query_row(
            &format!("SELECT {TREE_COLS} FROM trees WHERE tree_number = ?"),
            [tree_number],
            records::Tree::from_row,
        ) {
            Ok(tree) => Ok(Some(tree)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List trees, optionally filtered by status, in tree-number order.
    pub fn list_trees(&self, status: Option<TreeStatus>) -> Result<Vec<Tree>> {
        let conn = self.lock();
        let mut rows = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TREE_COLS} FROM trees WHERE status = ? ORDER BY tree_number"
                ))?;
                for tree in stmt.query_map([status.as_str()], records::Tree::from_row)? {
                    rows.push(tree?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!("SELECT {TREE_COLS} FROM trees ORDER BY tree_number"))?;
                for tree in stmt.query_map([], records::Tree::from_row)? {
                    rows.push(tree?);
                }
            }
        }
        Ok(rows)
    }

    pub fn update_tree(&self, tree_id: i64, update: &TreeUpdate) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let species_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM species WHERE id = ?)",
            [update.species_id],
            |row| row.get(0),
        )?;
        if !species_exists {
            return Err(Error::SpeciesNotFound(update.species_id));
        }

        let changed = tx.execute(
            "UPDATE trees SET name = ?, species_id = ?, special_note = ?, acquired_on = ?, origin_on = ?
             WHERE id = ?",
            params![
                update.name,
                update.species_id,
                update.special_note,
                update.acquired_on.map(fmt_date),
                update.origin_on.map(fmt_date),
                tree_id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::TreeNotFound(tree_id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the tree's special note (latest value only, no history).
    pub fn set_special_note(&self, tree_id: i64, note: Option<&str>) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE trees SET special_note = ? WHERE id = ?",
            params![note, tree_id],
        )?;
        if changed == 0 {
            return Err(Error::TreeNotFound(tree_id));
        }
        Ok(())
    }

    /// Move a tree through its lifecycle. Illegal transitions are rejected;
    /// photos, work entries and reminders are retained either way.
    pub fn transition_tree(&self, tree_id: i64, to: TreeStatus) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tree = tx
            .query_row(
                &format!("SELECT {TREE_COLS} FROM trees WHERE id = ?"),
                [tree_id],
                records::Tree::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::TreeNotFound(tree_id),
                e => e.into(),
            })?;
        if !tree.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                tree_number: tree.tree_number,
                from: tree.status,
                to,
            });
        }

        tx.execute(
            "UPDATE trees SET status = ? WHERE id = ?",
            params![to.as_str(), tree_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The latest non-null trunk-width sample, computed from the work log.
    pub fn current_trunk_width(&self, tree_id: i64) -> Result<Option<f64>> {
        let conn = self.lock();
        match conn.query_row(
            "SELECT trunk_width_cm FROM work_entries
             WHERE tree_id = ? AND trunk_width_cm IS NOT NULL
             ORDER BY performed_at DESC, id DESC LIMIT 1",
            [tree_id],
            |row| row.get(0),
        ) {
            Ok(width) => Ok(Some(width)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Photos
    // ========================================================================

    /// Insert a photo row. Part of the ingestion protocol: the image file
    /// must already be staged, and is renamed into place only after this
    /// commit succeeds (see `photos::add_photos`).
    pub fn insert_photo(
        &self,
        tree_id: i64,
        file_name: &str,
        taken_at: NaiveDateTime,
        confidence: DateConfidence,
        description: Option<&str>,
    ) -> Result<Photo> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tree_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trees WHERE id = ?)",
            [tree_id],
            |row| row.get(0),
        )?;
        if !tree_exists {
            return Err(Error::TreeNotFound(tree_id));
        }

        let created_at = now();
        tx.execute(
            "INSERT INTO photos (tree_id, file_name, taken_at, date_confidence, is_primary, description, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                tree_id,
                file_name,
                fmt_datetime(taken_at),
                confidence.as_str(),
                description,
                fmt_datetime(created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Photo {
            id,
            tree_id,
            file_name: file_name.to_string(),
            taken_at,
            confidence,
            is_primary: false,
            description: description.map(str::to_string),
            created_at,
        })
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Photo> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {PHOTO_COLS} FROM photos WHERE id = ?"),
            [photo_id],
            records::Photo::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::PhotoNotFound(photo_id),
            e => e.into(),
        })
    }

    /// Photos for a tree in chronological (capture-date) order, which is
    /// not necessarily insertion order.
    pub fn list_photos(&self, tree_id: i64) -> Result<Vec<Photo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLS} FROM photos WHERE tree_id = ? ORDER BY taken_at, id"
        ))?;
        let rows = stmt
            .query_map([tree_id], records::Photo::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Make a photo the tree's primary, atomically clearing the previous
    /// primary in the same transaction.
    pub fn set_primary_photo(&self, tree_id: i64, photo_id: i64) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let owner: i64 = tx
            .query_row(
                "SELECT tree_id FROM photos WHERE id = ?",
                [photo_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::PhotoNotFound(photo_id),
                e => e.into(),
            })?;
        if owner != tree_id {
            return Err(Error::PhotoTreeMismatch {
                photo_id,
                expected: tree_id,
                actual: owner,
            });
        }

        // Clear before set so the partial unique index never sees two
        tx.execute(
            "UPDATE photos SET is_primary = 0 WHERE tree_id = ? AND is_primary = 1",
            [tree_id],
        )?;
        tx.execute("UPDATE photos SET is_primary = 1 WHERE id = ?", [photo_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn primary_photo(&self, tree_id: i64) -> Result<Option<Photo>> {
        let conn = self.lock();
        match conn.query_row(
            &format!("SELECT {PHOTO_COLS} FROM photos WHERE tree_id = ? AND is_primary = 1"),
            [tree_id],
            records::Photo::from_row,
        ) {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a photo's caption (latest value only, like the tree note).
    pub fn set_photo_description(&self, photo_id: i64, description: Option<&str>) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE photos SET description = ? WHERE id = ?",
            params![description, photo_id],
        )?;
        if changed == 0 {
            return Err(Error::PhotoNotFound(photo_id));
        }
        Ok(())
    }

    /// Manual correction of an extracted capture date.
    pub fn override_photo_date(&self, photo_id: i64, taken_at: NaiveDateTime) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE photos SET taken_at = ?, date_confidence = ? WHERE id = ?",
            params![
                fmt_datetime(taken_at),
                DateConfidence::Manual.as_str(),
                photo_id
            ],
        )?;
        if changed == 0 {
            return Err(Error::PhotoNotFound(photo_id));
        }
        Ok(())
    }

    /// Delete a photo row, returning its file name so the caller can remove
    /// the physical file afterwards (row first, then file).
    pub fn delete_photo_row(&self, photo_id: i64) -> Result<String> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let file_name: String = tx
            .query_row(
                "SELECT file_name FROM photos WHERE id = ?",
                [photo_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::PhotoNotFound(photo_id),
                e => e.into(),
            })?;

        tx.execute(
            "UPDATE work_entries SET photo_id = NULL WHERE photo_id = ?",
            [photo_id],
        )?;
        tx.execute("DELETE FROM photos WHERE id = ?", [photo_id])?;
        tx.commit()?;
        Ok(file_name)
    }

    /// Delete every photo row of a tree, returning the orphaned file names.
    /// Used by the explicit purge; ordinary status transitions retain photos.
    pub fn purge_tree_photos(&self, tree_id: i64) -> Result<Vec<String>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tree_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trees WHERE id = ?)",
            [tree_id],
            |row| row.get(0),
        )?;
        if !tree_exists {
            return Err(Error::TreeNotFound(tree_id));
        }

        let file_names = {
            let mut stmt =
                tx.prepare("SELECT file_name FROM photos WHERE tree_id = ? ORDER BY id")?;
            let names = stmt
                .query_map([tree_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };

        tx.execute(
            "UPDATE work_entries SET photo_id = NULL WHERE tree_id = ?",
            [tree_id],
        )?;
        tx.execute("DELETE FROM photos WHERE tree_id = ?", [tree_id])?;
        tx.commit()?;
        Ok(file_names)
    }

    // ========================================================================
    // Work log
    // ========================================================================

    pub fn add_work_entry(&self, new: &NewWorkEntry) -> Result<WorkEntry> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tree_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trees WHERE id = ?)",
            [new.tree_id],
            |row| row.get(0),
        )?;
        if !tree_exists {
            return Err(Error::TreeNotFound(new.tree_id));
        }

        if let Some(photo_id) = new.photo_id {
            let owner: i64 = tx
                .query_row(
                    "SELECT tree_id FROM photos WHERE id = ?",
                    [photo_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Error::PhotoNotFound(photo_id),
                    e => e.into(),
                })?;
            if owner != new.tree_id {
                return Err(Error::CrossTreeLink {
                    kind: "photo",
                    id: photo_id,
                });
            }
        }
        if let Some(reminder_id) = new.reminder_id {
            let owner: i64 = tx
                .query_row(
                    "SELECT tree_id FROM reminders WHERE id = ?",
                    [reminder_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Error::ReminderNotFound(reminder_id),
                    e => e.into(),
                })?;
            if owner != new.tree_id {
                return Err(Error::CrossTreeLink {
                    kind: "reminder",
                    id: reminder_id,
                });
            }
        }

        let created_at = now();
        tx.execute(
            "INSERT INTO work_entries (tree_id, performed_at, description, trunk_width_cm, photo_id, reminder_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                new.tree_id,
                fmt_datetime(new.performed_at),
                new.description,
                new.trunk_width_cm,
                new.photo_id,
                new.reminder_id,
                fmt_datetime(created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(WorkEntry {
            id,
            tree_id: new.tree_id,
            performed_at: new.performed_at,
            description: new.description.clone(),
            trunk_width_cm: new.trunk_width_cm,
            photo_id: new.photo_id,
            reminder_id: new.reminder_id,
            created_at,
        })
    }

    pub fn list_work_entries(&self, tree_id: i64) -> Result<Vec<WorkEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORK_COLS} FROM work_entries WHERE tree_id = ? ORDER BY performed_at, id"
        ))?;
        let rows = stmt
            .query_map([tree_id], records::WorkEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // Reminders
    // ========================================================================

    pub fn add_reminder(&self, tree_id: i64, due_on: NaiveDate, message: &str) -> Result<Reminder> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tree_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trees WHERE id = ?)",
            [tree_id],
            |row| row.get(0),
        )?;
        if !tree_exists {
            return Err(Error::TreeNotFound(tree_id));
        }

        let created_at = now();
        tx.execute(
            "INSERT INTO reminders (tree_id, due_on, message, completed, notified, created_at)
             VALUES (?, ?, ?, 0, 0, ?)",
            params![tree_id, fmt_date(due_on), message, fmt_datetime(created_at)],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Reminder {
            id,
            tree_id,
            due_on,
            message: message.to_string(),
            completed: false,
            notified: false,
            created_at,
        })
    }

    pub fn list_reminders(&self, tree_id: i64) -> Result<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders WHERE tree_id = ? ORDER BY due_on, id"
        ))?;
        let rows = stmt
            .query_map([tree_id], records::Reminder::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mark a reminder completed. Set-once: completing an already completed
    /// reminder is a no-op, and there is no way back to pending.
    pub fn complete_reminder(&self, reminder_id: i64) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE reminders SET completed = 1 WHERE id = ?",
            [reminder_id],
        )?;
        if changed == 0 {
            return Err(Error::ReminderNotFound(reminder_id));
        }
        Ok(())
    }

    pub fn mark_reminder_notified(&self, reminder_id: i64) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE reminders SET notified = 1 WHERE id = ?",
            [reminder_id],
        )?;
        if changed == 0 {
            return Err(Error::ReminderNotFound(reminder_id));
        }
        Ok(())
    }

    /// Incomplete reminders due on or before the given date.
    pub fn due_reminders(&self, on: NaiveDate) -> Result<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders
             WHERE completed = 0 AND due_on <= ? ORDER BY due_on, id"
        ))?;
        let rows = stmt
            .query_map([fmt_date(on)], records::Reminder::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Due reminders that have not been surfaced yet. The notification
    /// path reads this and then marks each one notified, so a reminder is
    /// announced once even though it stays due until completed.
    pub fn unnotified_due_reminders(&self, on: NaiveDate) -> Result<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders
             WHERE completed = 0 AND notified = 0 AND due_on <= ? ORDER BY due_on, id"
        ))?;
        let rows = stmt
            .query_map([fmt_date(on)], records::Reminder::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::{seed_tree, test_db};
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let db = test_db();
        // Re-running setup must treat already-applied column migrations as
        // benign and everything else as an error
        db.initialize().unwrap();
        db.initialize().unwrap();
        seed_tree(&db, "Juniper", "J");
    }

    #[test]
    fn test_species_get_or_create_is_case_insensitive() {
        let db = test_db();
        let a = db.get_or_create_species("Juniper").unwrap();
        let b = db.get_or_create_species("juniper").unwrap();
        let c = db.get_or_create_species("  JUNIPER ").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert_eq!(b.name, "Juniper");
        assert_eq!(db.species_names().unwrap(), vec!["Juniper"]);
    }

    #[test]
    fn test_species_delete_guarded_by_dependent_tree() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "Shimpaku #1");
        let err = db.delete_species(tree.species_id).unwrap_err();
        match err {
            crate::Error::SpeciesInUse {
                name,
                tree_number,
                tree_name,
            } => {
                assert_eq!(name, "Juniper");
                assert_eq!(tree_number, 1);
                assert_eq!(tree_name, "Shimpaku #1");
            }
            other => panic!("expected SpeciesInUse, got {other:?}"),
        }

        // Even a deleted tree keeps its species pinned
        db.transition_tree(tree.id, TreeStatus::Deleted).unwrap();
        assert!(db.delete_species(tree.species_id).is_err());

        let lone = db.get_or_create_species("Maple").unwrap();
        db.delete_species(lone.id).unwrap();
        assert_eq!(db.species_names().unwrap(), vec!["Juniper"]);
    }

    #[test]
    fn test_tree_numbers_monotonic_and_never_reused() {
        let db = test_db();
        let t1 = seed_tree(&db, "Juniper", "A");
        let t2 = seed_tree(&db, "Juniper", "B");
        assert_eq!(t1.tree_number, 1);
        assert_eq!(t2.tree_number, 2);

        db.transition_tree(t2.id, TreeStatus::Deleted).unwrap();
        let t3 = seed_tree(&db, "Juniper", "C");
        assert_eq!(t3.tree_number, 3);
    }

    #[test]
    fn test_transition_rules_enforced() {
        let db = test_db();
        let tree = seed_tree(&db, "Pine", "P");

        db.transition_tree(tree.id, TreeStatus::Graveyard).unwrap();
        let err = db
            .transition_tree(tree.id, TreeStatus::Graveyard)
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidTransition { .. }));

        db.transition_tree(tree.id, TreeStatus::Deleted).unwrap();
        assert_eq!(db.get_tree(tree.id).unwrap().status, TreeStatus::Deleted);

        // Photos survive the whole lifecycle
        let photos = db.list_photos(tree.id).unwrap();
        assert!(photos.is_empty());
    }

    #[test]
    fn test_primary_photo_handover_is_atomic() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        let p1 = db
            .insert_photo(tree.id, "tree_0001/a.jpg", dt(2023, 1, 1), DateConfidence::Exif, None)
            .unwrap();
        let p2 = db
            .insert_photo(tree.id, "tree_0001/b.jpg", dt(2023, 6, 1), DateConfidence::Exif, None)
            .unwrap();

        db.set_primary_photo(tree.id, p1.id).unwrap();
        db.set_primary_photo(tree.id, p2.id).unwrap();

        let primaries: Vec<_> = db
            .list_photos(tree.id)
            .unwrap()
            .into_iter()
            .filter(|p| p.is_primary)
            .collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].id, p2.id);
    }

    #[test]
    fn test_primary_photo_rejects_foreign_tree() {
        let db = test_db();
        let t1 = seed_tree(&db, "Juniper", "J");
        let t2 = seed_tree(&db, "Maple", "M");
        let photo = db
            .insert_photo(t1.id, "tree_0001/a.jpg", dt(2023, 1, 1), DateConfidence::Exif, None)
            .unwrap();

        let err = db.set_primary_photo(t2.id, photo.id).unwrap_err();
        assert!(matches!(err, crate::Error::PhotoTreeMismatch { .. }));
        assert!(db.primary_photo(t2.id).unwrap().is_none());
    }

    #[test]
    fn test_photos_listed_chronologically_not_by_insertion() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        // Inserted newest first
        db.insert_photo(tree.id, "tree_0001/b.jpg", dt(2023, 6, 1), DateConfidence::Exif, None)
            .unwrap();
        db.insert_photo(tree.id, "tree_0001/a.jpg", dt(2023, 1, 1), DateConfidence::Exif, None)
            .unwrap();

        let photos = db.list_photos(tree.id).unwrap();
        assert_eq!(photos[0].taken_at, dt(2023, 1, 1));
        assert_eq!(photos[1].taken_at, dt(2023, 6, 1));
    }

    #[test]
    fn test_override_photo_date_marks_manual() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        let photo = db
            .insert_photo(
                tree.id,
                "tree_0001/a.jpg",
                dt(2023, 1, 1),
                DateConfidence::WallClock,
                None,
            )
            .unwrap();

        db.override_photo_date(photo.id, dt(2022, 5, 4)).unwrap();
        let photo = db.get_photo(photo.id).unwrap();
        assert_eq!(photo.taken_at, dt(2022, 5, 4));
        assert_eq!(photo.confidence, DateConfidence::Manual);
        assert!(!photo.confidence.is_low_confidence());
    }

    #[test]
    fn test_trunk_width_is_latest_sample() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        assert_eq!(db.current_trunk_width(tree.id).unwrap(), None);

        db.add_work_entry(&NewWorkEntry {
            tree_id: tree.id,
            performed_at: dt(2023, 1, 1),
            description: "repot".to_string(),
            trunk_width_cm: Some(3.8),
            ..NewWorkEntry::default()
        })
        .unwrap();
        // No sample taken on this visit
        db.add_work_entry(&NewWorkEntry {
            tree_id: tree.id,
            performed_at: dt(2023, 8, 1),
            description: "prune".to_string(),
            ..NewWorkEntry::default()
        })
        .unwrap();
        db.add_work_entry(&NewWorkEntry {
            tree_id: tree.id,
            performed_at: dt(2023, 6, 1),
            description: "wire".to_string(),
            trunk_width_cm: Some(4.2),
            ..NewWorkEntry::default()
        })
        .unwrap();

        assert_eq!(db.current_trunk_width(tree.id).unwrap(), Some(4.2));
    }

    #[test]
    fn test_work_entry_links_must_stay_within_tree() {
        let db = test_db();
        let t1 = seed_tree(&db, "Juniper", "J");
        let t2 = seed_tree(&db, "Maple", "M");
        let photo = db
            .insert_photo(t2.id, "tree_0002/a.jpg", dt(2023, 1, 1), DateConfidence::Exif, None)
            .unwrap();

        let err = db
            .add_work_entry(&NewWorkEntry {
                tree_id: t1.id,
                performed_at: dt(2023, 1, 2),
                description: "styling".to_string(),
                photo_id: Some(photo.id),
                ..NewWorkEntry::default()
            })
            .unwrap_err();
        assert!(matches!(err, crate::Error::CrossTreeLink { kind: "photo", .. }));
        assert!(db.list_work_entries(t1.id).unwrap().is_empty());
    }

    #[test]
    fn test_reminder_completion_is_set_once() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        let due = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        let reminder = db.add_reminder(tree.id, due, "feed").unwrap();

        assert_eq!(db.due_reminders(due).unwrap().len(), 1);
        db.complete_reminder(reminder.id).unwrap();
        db.complete_reminder(reminder.id).unwrap(); // idempotent
        assert!(db.due_reminders(due).unwrap().is_empty());
        assert!(db.list_reminders(tree.id).unwrap()[0].completed);
    }

    #[test]
    fn test_notified_reminder_not_resurfaced() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        let due = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        let reminder = db.add_reminder(tree.id, due, "wire check").unwrap();

        assert_eq!(db.unnotified_due_reminders(due).unwrap().len(), 1);
        db.mark_reminder_notified(reminder.id).unwrap();

        // Announced once; still due until completed
        assert!(db.unnotified_due_reminders(due).unwrap().is_empty());
        assert_eq!(db.due_reminders(due).unwrap().len(), 1);
    }

    #[test]
    fn test_purge_returns_file_names_and_unlinks_work_entries() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "J");
        let photo = db
            .insert_photo(tree.id, "tree_0001/a.jpg", dt(2023, 1, 1), DateConfidence::Exif, None)
            .unwrap();
        db.add_work_entry(&NewWorkEntry {
            tree_id: tree.id,
            performed_at: dt(2023, 1, 1),
            description: "initial".to_string(),
            photo_id: Some(photo.id),
            ..NewWorkEntry::default()
        })
        .unwrap();

        let names = db.purge_tree_photos(tree.id).unwrap();
        assert_eq!(names, vec!["tree_0001/a.jpg".to_string()]);
        assert!(db.list_photos(tree.id).unwrap().is_empty());
        // Work log survives with the link cleared
        let entries = db.list_work_entries(tree.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].photo_id, None);
    }
}
