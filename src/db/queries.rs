// Database queries: CRUD operations for all tables.
//
// Every SQLite interaction goes through this module. This keeps SQL contained
// in one place and gives the rest of the app clean Rust interfaces.
// Timestamps are stored as RFC 3339 text with a fixed precision so that
// lexical order equals chronological order.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    AnalysisResult, AttachedFile, ContentItem, ContentKind, NewAnalysisResult, NewAttachedFile,
    NewContentItem, StoreCounts,
};

const ITEM_COLUMNS: &str = "id, kind, title, body, author_ref, article_id, parent_id,
                            created_at, analyzed, flagged_reason";

const RESULT_COLUMNS: &str = "id, content_item_id, contains_profanity, is_nsfw,
                              contains_phone_pattern, raw_classifier_notes, created_at";

/// Format a timestamp for storage.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    let kind_raw: String = row.get(1)?;
    let kind = ContentKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown content kind {kind_raw:?}").into(),
        )
    })?;
    let created_at: String = row.get(7)?;
    Ok(ContentItem {
        id: row.get(0)?,
        kind,
        title: row.get(2)?,
        body: row.get(3)?,
        author_ref: row.get(4)?,
        article_id: row.get(5)?,
        parent_id: row.get(6)?,
        created_at: parse_timestamp(7, &created_at)?,
        analyzed: row.get(8)?,
        flagged_reason: row.get(9)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisResult> {
    let created_at: String = row.get(6)?;
    Ok(AnalysisResult {
        id: row.get(0)?,
        content_item_id: row.get(1)?,
        contains_profanity: row.get(2)?,
        is_nsfw: row.get(3)?,
        contains_phone_pattern: row.get(4)?,
        raw_classifier_notes: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

// --- Content items ---

/// Insert a content row and return its ID.
pub fn insert_item(conn: &Connection, item: &NewContentItem, created_at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO content_items (kind, title, body, author_ref, article_id, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            item.kind.as_str(),
            item.title,
            item.body,
            item.author_ref,
            item.article_id,
            item.parent_id,
            format_timestamp(created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_item(conn: &Connection, id: i64) -> Result<Option<ContentItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ?1");
    let item = conn.query_row(&sql, params![id], item_from_row).optional()?;
    Ok(item)
}

/// The unanalyzed queue: oldest first, flagged items excluded.
pub fn fetch_unanalyzed(conn: &Connection, limit: u32) -> Result<Vec<ContentItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM content_items
         WHERE analyzed = 0 AND flagged_reason IS NULL
         ORDER BY created_at ASC, id ASC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], item_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Most recent items first, for listings.
pub fn list_items(conn: &Connection, limit: u32) -> Result<Vec<ContentItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM content_items
         ORDER BY created_at DESC, id DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], item_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// All comments on an article as a flat sequence in creation order.
pub fn comments_for_article(conn: &Connection, article_id: i64) -> Result<Vec<ContentItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM content_items
         WHERE kind = 'comment' AND article_id = ?1
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![article_id], item_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Set the analyzed watermark. Returns false if no such item exists.
pub fn mark_analyzed(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE content_items SET analyzed = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Drop an item from the queue permanently. Returns false if no such item exists.
pub fn flag_invalid(conn: &Connection, id: i64, reason: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE content_items SET flagged_reason = ?2 WHERE id = ?1",
        params![id, reason],
    )?;
    Ok(changed > 0)
}

// --- Attached files ---

pub fn attach_file(conn: &Connection, file: &NewAttachedFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO attached_files (owner_content_id, display_name, stored_name, payload, mime_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file.owner_content_id,
            file.display_name,
            file.stored_name,
            file.payload,
            file.mime_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn files_for(conn: &Connection, content_id: i64) -> Result<Vec<AttachedFile>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_content_id, display_name, stored_name, payload, mime_type
         FROM attached_files
         WHERE owner_content_id = ?1
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![content_id], |row| {
        Ok(AttachedFile {
            id: row.get(0)?,
            owner_content_id: row.get(1)?,
            display_name: row.get(2)?,
            stored_name: row.get(3)?,
            payload: row.get(4)?,
            mime_type: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// --- Analysis results ---

/// Append a result row and return its ID.
pub fn insert_result(
    conn: &Connection,
    result: &NewAnalysisResult,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO analysis_results
            (content_item_id, contains_profanity, is_nsfw, contains_phone_pattern,
             raw_classifier_notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            result.content_item_id,
            result.contains_profanity,
            result.is_nsfw,
            result.contains_phone_pattern,
            result.raw_classifier_notes,
            format_timestamp(created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Append a result and set the watermark in one transaction.
///
/// Returns `None` (and writes nothing) if the item doesn't exist, so a
/// result can never outlive its item's watermark.
pub fn record_analysis(
    conn: &Connection,
    result: &NewAnalysisResult,
    created_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let tx = conn.unchecked_transaction()?;
    if !mark_analyzed(&tx, result.content_item_id)? {
        // Dropping the transaction rolls it back
        return Ok(None);
    }
    let id = insert_result(&tx, result, created_at)?;
    tx.commit()?;
    Ok(Some(id))
}

/// All results for an item, newest first.
pub fn results_for(conn: &Connection, content_id: i64) -> Result<Vec<AnalysisResult>> {
    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM analysis_results
         WHERE content_item_id = ?1
         ORDER BY id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![content_id], result_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn recent_results(conn: &Connection, limit: u32) -> Result<Vec<AnalysisResult>> {
    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM analysis_results
         ORDER BY id DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], result_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// --- Status ---

pub fn counts(conn: &Connection) -> Result<StoreCounts> {
    let counts = conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(analyzed = 1), 0),
            COALESCE(SUM(analyzed = 0 AND flagged_reason IS NULL), 0),
            COALESCE(SUM(flagged_reason IS NOT NULL), 0),
            (SELECT COUNT(*) FROM analysis_results)
         FROM content_items",
        [],
        |row| {
            Ok(StoreCounts {
                items: row.get(0)?,
                analyzed: row.get(1)?,
                pending: row.get(2)?,
                flagged: row.get(3)?,
                results: row.get(4)?,
            })
        },
    )?;
    Ok(counts)
}

// --- Pipeline state ---

/// Get a pipeline state value by key (e.g., "last_tick_at").
pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM pipeline_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a pipeline state value (upsert).
pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO pipeline_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}
