//! Entity types stored by the record store.

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FMT: &str = "%Y-%m-%d";

/// Lifecycle status of a tree.
///
/// Transitions are restricted to the table in [`TreeStatus::can_transition`];
/// owned photos, work entries and reminders are retained at every
/// transition. Removing image files is a separate, explicit purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeStatus {
    Active,
    Graveyard,
    Deleted,
}

/// The legal lifecycle transitions: active trees can die or be removed,
/// graveyard trees can only be removed.
const TRANSITIONS: &[(TreeStatus, TreeStatus)] = &[
    (TreeStatus::Active, TreeStatus::Graveyard),
    (TreeStatus::Active, TreeStatus::Deleted),
    (TreeStatus::Graveyard, TreeStatus::Deleted),
];

impl TreeStatus {
    pub fn can_transition(self, to: TreeStatus) -> bool {
        TRANSITIONS.contains(&(self, to))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TreeStatus::Active => "active",
            TreeStatus::Graveyard => "graveyard",
            TreeStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TreeStatus::Active),
            "graveyard" => Some(TreeStatus::Graveyard),
            "deleted" => Some(TreeStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a photo's capture date came from.
///
/// `Exif` and `Manual` are authoritative; the fallback sources are
/// low-confidence and should be offered for manual correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConfidence {
    Exif,
    FileMtime,
    WallClock,
    Manual,
}

impl DateConfidence {
    pub fn is_low_confidence(self) -> bool {
        matches!(self, DateConfidence::FileMtime | DateConfidence::WallClock)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateConfidence::Exif => "exif",
            DateConfidence::FileMtime => "file_mtime",
            DateConfidence::WallClock => "wall_clock",
            DateConfidence::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exif" => Some(DateConfidence::Exif),
            "file_mtime" => Some(DateConfidence::FileMtime),
            "wall_clock" => Some(DateConfidence::WallClock),
            "manual" => Some(DateConfidence::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub id: i64,
    /// Human-facing sequential number. Immutable, never reused.
    pub tree_number: i64,
    pub name: String,
    pub species_id: i64,
    /// Single mutable note; latest value only, no history.
    pub special_note: Option<String>,
    pub status: TreeStatus,
    pub acquired_on: Option<NaiveDate>,
    pub origin_on: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

impl Tree {
    /// Years in training, counted from the acquisition date.
    pub fn training_age_years(&self, today: NaiveDate) -> Option<f64> {
        self.acquired_on
            .map(|d| (today - d).num_days() as f64 / 365.25)
    }

    /// Estimated true age, counted from the origin date.
    pub fn true_age_years(&self, today: NaiveDate) -> Option<f64> {
        self.origin_on
            .map(|d| (today - d).num_days() as f64 / 365.25)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub tree_id: i64,
    /// Relative path into the image store.
    pub file_name: String,
    pub taken_at: NaiveDateTime,
    pub confidence: DateConfidence,
    pub is_primary: bool,
    /// Free-text caption for this photo.
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkEntry {
    pub id: i64,
    pub tree_id: i64,
    pub performed_at: NaiveDateTime,
    pub description: String,
    pub trunk_width_cm: Option<f64>,
    pub photo_id: Option<i64>,
    pub reminder_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub tree_id: i64,
    pub due_on: NaiveDate,
    pub message: String,
    pub completed: bool,
    pub notified: bool,
    pub created_at: NaiveDateTime,
}

/// Current UTC time at the precision the store keeps. Columns hold
/// seconds-precision text, so returned entities must carry no sub-second
/// part or they would never compare equal to their re-read rows.
pub fn now() -> NaiveDateTime {
    let t = Utc::now().naive_utc();
    t.with_nanosecond(0).unwrap_or(t)
}

pub fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

fn conversion_err(idx: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn datetime_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FMT).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn opt_date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn bad_enum(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {what} \"{value}\"").into(),
    )
}

impl Species {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Species {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: datetime_col(row, 2)?,
        })
    }
}

impl Tree {
    /// Column order: id, tree_number, name, species_id, special_note,
    /// status, acquired_on, origin_on, created_at
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get(5)?;
        let status =
            TreeStatus::parse(&status_str).ok_or_else(|| bad_enum(5, "tree status", &status_str))?;
        Ok(Tree {
            id: row.get(0)?,
            tree_number: row.get(1)?,
            name: row.get(2)?,
            species_id: row.get(3)?,
            special_note: row.get(4)?,
            status,
            acquired_on: opt_date_col(row, 6)?,
            origin_on: opt_date_col(row, 7)?,
            created_at: datetime_col(row, 8)?,
        })
    }
}

impl Photo {
    /// Column order: id, tree_id, file_name, taken_at, date_confidence,
    /// is_primary, description, created_at
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let conf_str: String = row.get(4)?;
        let confidence = DateConfidence::parse(&conf_str)
            .ok_or_else(|| bad_enum(4, "date confidence", &conf_str))?;
        Ok(Photo {
            id: row.get(0)?,
            tree_id: row.get(1)?,
            file_name: row.get(2)?,
            taken_at: datetime_col(row, 3)?,
            confidence,
            is_primary: row.get::<_, i64>(5)? != 0,
            description: row.get(6)?,
            created_at: datetime_col(row, 7)?,
        })
    }
}

impl WorkEntry {
    /// Column order: id, tree_id, performed_at, description,
    /// trunk_width_cm, photo_id, reminder_id, created_at
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(WorkEntry {
            id: row.get(0)?,
            tree_id: row.get(1)?,
            performed_at: datetime_col(row, 2)?,
            description: row.get(3)?,
            trunk_width_cm: row.get(4)?,
            photo_id: row.get(5)?,
            reminder_id: row.get(6)?,
            created_at: datetime_col(row, 7)?,
        })
    }
}

impl Reminder {
    /// Column order: id, tree_id, due_on, message, completed, notified,
    /// created_at
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Reminder {
            id: row.get(0)?,
            tree_id: row.get(1)?,
            due_on: date_col(row, 2)?,
            message: row.get(3)?,
            completed: row.get::<_, i64>(4)? != 0,
            notified: row.get::<_, i64>(5)? != 0,
            created_at: datetime_col(row, 6)?,
        })
    }
}
