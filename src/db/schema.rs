// Database schema: table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Articles and comments share one arena table keyed by id.
        -- Comments point at their article; replies point at their parent comment.
        CREATE TABLE IF NOT EXISTS content_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK (kind IN ('article', 'comment')),
            title TEXT,
            body TEXT NOT NULL,
            author_ref TEXT NOT NULL,
            article_id INTEGER REFERENCES content_items(id),
            parent_id INTEGER REFERENCES content_items(id),
            created_at TEXT NOT NULL,          -- RFC 3339, UTC
            analyzed INTEGER NOT NULL DEFAULT 0
        );

        -- Binary attachments, referenced by owner id (never embedded)
        CREATE TABLE IF NOT EXISTS attached_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_content_id INTEGER NOT NULL REFERENCES content_items(id),
            display_name TEXT NOT NULL,
            stored_name TEXT NOT NULL,
            payload BLOB NOT NULL,
            mime_type TEXT NOT NULL
        );

        -- Append-only moderation verdicts (re-analysis adds a row)
        CREATE TABLE IF NOT EXISTS analysis_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_item_id INTEGER NOT NULL REFERENCES content_items(id),
            contains_profanity INTEGER NOT NULL,
            is_nsfw INTEGER NOT NULL,
            contains_phone_pattern INTEGER NOT NULL,
            raw_classifier_notes TEXT NOT NULL,  -- JSON
            created_at TEXT NOT NULL
        );

        -- Pipeline bookkeeping (last tick time, last tick summary)
        CREATE TABLE IF NOT EXISTS pipeline_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- The unanalyzed queue is read in creation order every tick
        CREATE INDEX IF NOT EXISTS idx_items_pending
            ON content_items(analyzed, created_at);

        -- Thread assembly for an article's comments
        CREATE INDEX IF NOT EXISTS idx_items_article
            ON content_items(article_id);

        CREATE INDEX IF NOT EXISTS idx_files_owner
            ON attached_files(owner_content_id);

        CREATE INDEX IF NOT EXISTS idx_results_item
            ON analysis_results(content_item_id);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: items that fail with invalid input are flagged and
    // dropped from the unanalyzed queue instead of being retried forever.
    run_migration(conn, 2, |c| {
        c.execute_batch("ALTER TABLE content_items ADD COLUMN flagged_reason TEXT;")
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
