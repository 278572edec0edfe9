//! `SQLite` schema for the upload ledger.

/// SQL statement to create the uploads table.
pub const CREATE_UPLOADS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `content_hash` for duplicate detection.
pub const CREATE_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_uploads_hash ON uploads(content_hash)
";

/// SQL statement to create an index on `uploaded_at` for recency queries.
pub const CREATE_UPLOADED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_uploads_uploaded_at ON uploads(uploaded_at DESC)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_UPLOADS_TABLE,
    CREATE_HASH_INDEX,
    CREATE_UPLOADED_AT_INDEX,
    CREATE_METADATA_TABLE,
];
