use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS roster (
    person_id  INTEGER PRIMARY KEY,
    group_name TEXT
);

CREATE TABLE IF NOT EXISTS face_embeddings (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id     INTEGER NOT NULL REFERENCES roster(person_id),
    embedding     TEXT NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_person ON face_embeddings(person_id);

CREATE TABLE IF NOT EXISTS attendance (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id        INTEGER NOT NULL,
    day              TEXT NOT NULL,
    status           TEXT NOT NULL,
    confidence_score REAL,
    approval         TEXT NOT NULL DEFAULT 'none',
    approver_id      INTEGER,
    approved_at      TEXT,
    note             TEXT,
    excuse_reason    TEXT,
    teacher_comment  TEXT,
    checked_in_at    TEXT,
    UNIQUE(person_id, day)
);
CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance(day);
";

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)
}
