pub const SCHEMA: &str = r#"
-- Species: created implicitly, unique case-insensitively via name_folded
CREATE TABLE IF NOT EXISTS species (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    name_folded TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Trees: lifecycle status is 'active', 'graveyard' or 'deleted'.
-- Deletion is logical; rows are never removed, so photo/work/reminder
-- foreign keys stay valid for the whole history of the collection.
CREATE TABLE IF NOT EXISTS trees (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_number INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    species_id INTEGER NOT NULL REFERENCES species(id),
    special_note TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    acquired_on TEXT,
    origin_on TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trees_species ON trees(species_id);
CREATE INDEX IF NOT EXISTS idx_trees_status ON trees(status);

-- Monotonic counters. next_tree_number is never decremented, so tree
-- numbers are not reused even across a delete-then-recreate cycle.
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO counters (name, value) VALUES ('next_tree_number', 1);

-- Photos: file_name is the relative path into the image store.
-- taken_at is the capture date; created_at is the ingestion timestamp
-- (insertion order is not chronological order).
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id INTEGER NOT NULL REFERENCES trees(id),
    file_name TEXT NOT NULL UNIQUE,
    taken_at TEXT NOT NULL,
    date_confidence TEXT NOT NULL DEFAULT 'exif',
    is_primary INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_tree ON photos(tree_id);
CREATE INDEX IF NOT EXISTS idx_photos_taken_at ON photos(taken_at);
-- Backstop for the one-primary-per-tree invariant
CREATE UNIQUE INDEX IF NOT EXISTS idx_photos_primary
    ON photos(tree_id) WHERE is_primary = 1;

-- Work log. Append-only; trunk-width history is the ordered sequence of
-- trunk_width_cm samples, not a separate table.
CREATE TABLE IF NOT EXISTS work_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id INTEGER NOT NULL REFERENCES trees(id),
    performed_at TEXT NOT NULL,
    description TEXT NOT NULL,
    trunk_width_cm REAL,
    photo_id INTEGER REFERENCES photos(id),
    reminder_id INTEGER REFERENCES reminders(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_entries_tree ON work_entries(tree_id);
CREATE INDEX IF NOT EXISTS idx_work_entries_performed ON work_entries(performed_at);

CREATE TABLE IF NOT EXISTS reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id INTEGER NOT NULL REFERENCES trees(id),
    due_on TEXT NOT NULL,
    message TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    notified INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reminders_tree ON reminders(tree_id);
CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(due_on);
"#;

/// Additive migrations for databases created before the column existed.
/// Errors (column already present) are ignored when these run.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE trees ADD COLUMN acquired_on TEXT",
    "ALTER TABLE trees ADD COLUMN origin_on TEXT",
    "ALTER TABLE reminders ADD COLUMN notified INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE photos ADD COLUMN description TEXT",
];
