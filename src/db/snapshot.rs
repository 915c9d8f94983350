//! Consistent full-collection snapshot and the import-only full replace.
//!
//! The snapshot is the exporter's single source of truth: one transaction
//! reads every table (and the tree-number counter), so a concurrent write
//! can never be observed half-applied across tables. `replace_all` is the
//! inverse, used only by the importer: wipe and reinstall everything in one
//! transaction while the connection mutex keeps every other operation out.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::records::{self, fmt_date, fmt_datetime, Photo, Reminder, Species, Tree, WorkEntry};
use super::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Counter state, carried so tree numbering continues after a restore.
    pub next_tree_number: i64,
    pub species: Vec<Species>,
    pub trees: Vec<Tree>,
    pub photos: Vec<Photo>,
    pub work_entries: Vec<WorkEntry>,
    pub reminders: Vec<Reminder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub species: usize,
    pub trees: usize,
    pub photos: usize,
    pub work_entries: usize,
    pub reminders: usize,
}

impl Snapshot {
    pub fn counts(&self) -> RowCounts {
        RowCounts {
            species: self.species.len(),
            trees: self.trees.len(),
            photos: self.photos.len(),
            work_entries: self.work_entries.len(),
            reminders: self.reminders.len(),
        }
    }
}

impl Database {
    /// Read every row of every entity as one consistent point-in-time view.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let species = {
            let mut stmt =
                tx.prepare("SELECT id, name, created_at FROM species ORDER BY id")?;
            let rows = stmt
                .query_map([], records::Species::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let trees = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM trees ORDER BY id",
                super::TREE_COLS
            ))?;
            let rows = stmt
                .query_map([], records::Tree::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let photos = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM photos ORDER BY id",
                super::PHOTO_COLS
            ))?;
            let rows = stmt
                .query_map([], records::Photo::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let work_entries = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM work_entries ORDER BY id",
                super::WORK_COLS
            ))?;
            let rows = stmt
                .query_map([], records::WorkEntry::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let reminders = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM reminders ORDER BY id",
                super::REMINDER_COLS
            ))?;
            let rows = stmt
                .query_map([], records::Reminder::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let next_tree_number: i64 = tx.query_row(
            "SELECT value FROM counters WHERE name = 'next_tree_number'",
            [],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(Snapshot {
            next_tree_number,
            species,
            trees,
            photos,
            work_entries,
            reminders,
        })
    }

    /// Current row counts per entity, without materializing the rows.
    pub fn row_counts(&self) -> Result<RowCounts> {
        let conn = self.lock();
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };
        Ok(RowCounts {
            species: count("species")?,
            trees: count("trees")?,
            photos: count("photos")?,
            work_entries: count("work_entries")?,
            reminders: count("reminders")?,
        })
    }

    /// Wipe the store and install the snapshot verbatim, preserving original
    /// ids and tree numbers. All-or-nothing; used only by the importer.
    ///
    /// Returns the file names of the photo rows that were wiped, read in
    /// the same transaction as the wipe, so the caller removes exactly the
    /// files whose rows this call deleted. An earlier snapshot would leave
    /// a window where a photo ingested in between loses its row here but
    /// keeps its file forever.
    ///
    /// The mutex guard is held for the whole transaction, so no other
    /// operation can observe the half-replaced database.
    pub fn replace_all(&self, snapshot: &Snapshot) -> Result<Vec<String>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let previous_files = {
            let mut stmt = tx.prepare("SELECT file_name FROM photos ORDER BY id")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };

        // Delete children before parents to satisfy foreign keys
        tx.execute("DELETE FROM work_entries", [])?;
        tx.execute("DELETE FROM photos", [])?;
        tx.execute("DELETE FROM reminders", [])?;
        tx.execute("DELETE FROM trees", [])?;
        tx.execute("DELETE FROM species", [])?;

        for species in &snapshot.species {
            tx.execute(
                "INSERT INTO species (id, name, name_folded, created_at) VALUES (?, ?, ?, ?)",
                params![
                    species.id,
                    species.name,
                    species.name.trim().to_lowercase(),
                    fmt_datetime(species.created_at),
                ],
            )?;
        }
        for tree in &snapshot.trees {
            tx.execute(
                "INSERT INTO trees (id, tree_number, name, species_id, special_note, status, acquired_on, origin_on, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    tree.id,
                    tree.tree_number,
                    tree.name,
                    tree.species_id,
                    tree.special_note,
                    tree.status.as_str(),
                    tree.acquired_on.map(fmt_date),
                    tree.origin_on.map(fmt_date),
                    fmt_datetime(tree.created_at),
                ],
            )
            .map_err(|e| {
                if super::is_unique_violation(&e, "trees.tree_number") {
                    Error::DuplicateTreeNumber(tree.tree_number)
                } else {
                    e.into()
                }
            })?;
        }
        for reminder in &snapshot.reminders {
            tx.execute(
                "INSERT INTO reminders (id, tree_id, due_on, message, completed, notified, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    reminder.id,
                    reminder.tree_id,
                    fmt_date(reminder.due_on),
                    reminder.message,
                    reminder.completed as i64,
                    reminder.notified as i64,
                    fmt_datetime(reminder.created_at),
                ],
            )?;
        }
        for photo in &snapshot.photos {
            tx.execute(
                "INSERT INTO photos (id, tree_id, file_name, taken_at, date_confidence, is_primary, description, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    photo.id,
                    photo.tree_id,
                    photo.file_name,
                    fmt_datetime(photo.taken_at),
                    photo.confidence.as_str(),
                    photo.is_primary as i64,
                    photo.description,
                    fmt_datetime(photo.created_at),
                ],
            )?;
        }
        for entry in &snapshot.work_entries {
            tx.execute(
                "INSERT INTO work_entries (id, tree_id, performed_at, description, trunk_width_cm, photo_id, reminder_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id,
                    entry.tree_id,
                    fmt_datetime(entry.performed_at),
                    entry.description,
                    entry.trunk_width_cm,
                    entry.photo_id,
                    entry.reminder_id,
                    fmt_datetime(entry.created_at),
                ],
            )?;
        }

        // Never move the counter backwards, even if the archive predates
        // locally assigned numbers.
        let floor = snapshot
            .trees
            .iter()
            .map(|t| t.tree_number + 1)
            .max()
            .unwrap_or(1)
            .max(snapshot.next_tree_number);
        tx.execute(
            "UPDATE counters SET value = MAX(value, ?) WHERE name = 'next_tree_number'",
            [floor],
        )?;

        tx.commit()?;
        Ok(previous_files)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{seed_tree, test_db};
    use super::super::{DateConfidence, NewWorkEntry, TreeStatus};
    use chrono::NaiveDate;

    #[test]
    fn test_snapshot_replace_round_trip() {
        let db = test_db();
        let tree = seed_tree(&db, "Juniper", "Shimpaku #1");
        let photo = db
            .insert_photo(
                tree.id,
                "tree_0001/a.jpg",
                NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                DateConfidence::Exif,
                None,
            )
            .unwrap();
        db.set_primary_photo(tree.id, photo.id).unwrap();
        db.add_work_entry(&NewWorkEntry {
            tree_id: tree.id,
            performed_at: photo.taken_at,
            description: "initial styling".to_string(),
            trunk_width_cm: Some(4.2),
            photo_id: Some(photo.id),
            ..NewWorkEntry::default()
        })
        .unwrap();
        db.add_reminder(
            tree.id,
            NaiveDate::from_ymd_opt(2023, 9, 1).unwrap(),
            "repot",
        )
        .unwrap();

        let before = db.snapshot().unwrap();

        let restored = test_db();
        restored.replace_all(&before).unwrap();
        let after = restored.snapshot().unwrap();
        assert_eq!(before, after);

        // Primary flag and computed width survive verbatim
        let primary = restored.primary_photo(tree.id).unwrap().unwrap();
        assert!(primary.is_primary);
        assert_eq!(restored.current_trunk_width(tree.id).unwrap(), Some(4.2));
    }

    #[test]
    fn test_replace_preserves_number_continuity() {
        let db = test_db();
        let t1 = seed_tree(&db, "Juniper", "A");
        let t2 = seed_tree(&db, "Juniper", "B");
        db.transition_tree(t2.id, TreeStatus::Deleted).unwrap();
        assert_eq!(t1.tree_number, 1);
        assert_eq!(t2.tree_number, 2);

        let snapshot = db.snapshot().unwrap();
        let restored = test_db();
        restored.replace_all(&snapshot).unwrap();

        let t3 = seed_tree(&restored, "Juniper", "C");
        assert_eq!(t3.tree_number, 3);
    }

    #[test]
    fn test_replace_reports_wiped_photo_files() {
        let db = test_db();
        let snapshot = db.snapshot().unwrap();

        let target = test_db();
        let tree = seed_tree(&target, "Juniper", "Local");
        target
            .insert_photo(
                tree.id,
                "tree_0001/local.jpg",
                NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                DateConfidence::Exif,
                None,
            )
            .unwrap();

        // Every row wiped by this call is reported, even ones no earlier
        // read ever observed
        let wiped = target.replace_all(&snapshot).unwrap();
        assert_eq!(wiped, vec!["tree_0001/local.jpg".to_string()]);
        assert!(target.replace_all(&snapshot).unwrap().is_empty());
    }

    #[test]
    fn test_replace_is_repeatable() {
        let db = test_db();
        seed_tree(&db, "Juniper", "A");
        let snapshot = db.snapshot().unwrap();

        let target = test_db();
        target.replace_all(&snapshot).unwrap();
        target.replace_all(&snapshot).unwrap();
        assert_eq!(target.snapshot().unwrap(), snapshot);
    }
}
