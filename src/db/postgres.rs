// PgStore: PostgreSQL backend implementing the ContentStore trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - TIMESTAMPTZ instead of RFC 3339 TEXT for timestamps
// - JSONB instead of TEXT for classifier notes
// - BYTEA for attachment payloads
// - $1/$2 parameter syntax (handled by sqlx)
// - GENERATED ALWAYS AS IDENTITY for auto-increment

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{
    AnalysisResult, AttachedFile, ContentItem, ContentKind, NewAnalysisResult, NewAttachedFile,
    NewContentItem, StoreCounts,
};
use super::traits::ContentStore;
use crate::error::{ModerationError, Result};

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

impl From<sqlx_core::error::Error> for ModerationError {
    fn from(err: sqlx_core::error::Error) -> Self {
        ModerationError::Storage(err.to_string())
    }
}

const ITEM_COLUMNS: &str = "id, kind, title, body, author_ref, article_id, parent_id,
                            created_at, analyzed, flagged_reason";

const RESULT_COLUMNS: &str = "id, content_item_id, contains_profanity, is_nsfw,
                              contains_phone_pattern, raw_classifier_notes, created_at";

/// LIMIT is bound as i32; anything larger is effectively unlimited.
fn limit_param(limit: u32) -> i32 {
    limit.min(i32::MAX as u32) as i32
}

fn item_from_row(row: &PgRow) -> Result<ContentItem> {
    let kind_raw: String = row.try_get(1)?;
    let kind = ContentKind::parse(&kind_raw)
        .ok_or_else(|| ModerationError::storage(format!("unknown content kind {kind_raw:?}")))?;
    Ok(ContentItem {
        id: row.try_get(0)?,
        kind,
        title: row.try_get(2)?,
        body: row.try_get(3)?,
        author_ref: row.try_get(4)?,
        article_id: row.try_get(5)?,
        parent_id: row.try_get(6)?,
        created_at: row.try_get::<DateTime<Utc>, _>(7)?,
        analyzed: row.try_get(8)?,
        flagged_reason: row.try_get(9)?,
    })
}

fn result_from_row(row: &PgRow) -> Result<AnalysisResult> {
    let notes: serde_json::Value = row.try_get(5)?;
    Ok(AnalysisResult {
        id: row.try_get(0)?,
        content_item_id: row.try_get(1)?,
        contains_profanity: row.try_get(2)?,
        is_nsfw: row.try_get(3)?,
        contains_phone_pattern: row.try_get(4)?,
        raw_classifier_notes: notes.to_string(),
        created_at: row.try_get::<DateTime<Utc>, _>(6)?,
    })
}

/// Notes are JSON text on the Rust side; anything unparseable is kept as a
/// JSON string rather than rejected.
fn notes_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {database_url}"))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// processes starting together don't race to apply the same migration.
    /// The unlock always runs, even if a migration failed.
    async fn run_migrations(&self) -> anyhow::Result<()> {
        // ASCII "VIGILDB!" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x564947494C444221_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: anyhow::Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(
                1,
                include_str!("../../migrations/postgres/0001_initial.sql"),
            )];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }
}

#[async_trait]
impl ContentStore for PgStore {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn fetch_unanalyzed(&self, limit: u32) -> Result<Vec<ContentItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM content_items
             WHERE analyzed = FALSE AND flagged_reason IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT $1"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn mark_analyzed(&self, id: i64) -> Result<()> {
        let result = sqlx_core::query::query("UPDATE content_items SET analyzed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(id));
        }
        Ok(())
    }

    async fn persist_result(&self, result: &NewAnalysisResult) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO analysis_results
                (content_item_id, contains_profanity, is_nsfw, contains_phone_pattern,
                 raw_classifier_notes)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(result.content_item_id)
        .bind(result.contains_profanity)
        .bind(result.is_nsfw)
        .bind(result.contains_phone_pattern)
        .bind(notes_value(&result.raw_classifier_notes))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn record_analysis(&self, result: &NewAnalysisResult) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx_core::query::query("UPDATE content_items SET analyzed = TRUE WHERE id = $1")
            .bind(result.content_item_id)
            .execute(&mut *tx)
            .await?;
        if marked.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(ModerationError::NotFound(result.content_item_id));
        }

        let row = sqlx_core::query::query(
            "INSERT INTO analysis_results
                (content_item_id, contains_profanity, is_nsfw, contains_phone_pattern,
                 raw_classifier_notes)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(result.content_item_id)
        .bind(result.contains_profanity)
        .bind(result.is_nsfw)
        .bind(result.contains_phone_pattern)
        .bind(notes_value(&result.raw_classifier_notes))
        .fetch_one(&mut *tx)
        .await?;
        let id = row.try_get::<i64, _>(0)?;

        tx.commit().await?;
        Ok(id)
    }

    async fn flag_invalid(&self, id: i64, reason: &str) -> Result<()> {
        let result =
            sqlx_core::query::query("UPDATE content_items SET flagged_reason = $2 WHERE id = $1")
                .bind(id)
                .bind(reason)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(id));
        }
        Ok(())
    }

    async fn files_for(&self, content_id: i64) -> Result<Vec<AttachedFile>> {
        let rows = sqlx_core::query::query(
            "SELECT id, owner_content_id, display_name, stored_name, payload, mime_type
             FROM attached_files
             WHERE owner_content_id = $1
             ORDER BY id ASC",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            files.push(AttachedFile {
                id: row.try_get(0)?,
                owner_content_id: row.try_get(1)?,
                display_name: row.try_get(2)?,
                stored_name: row.try_get(3)?,
                payload: row.try_get(4)?,
                mime_type: row.try_get(5)?,
            });
        }
        Ok(files)
    }

    async fn get_item(&self, id: i64) -> Result<Option<ContentItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = $1");
        let row = sqlx_core::query::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, limit: u32) -> Result<Vec<ContentItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM content_items
             ORDER BY created_at DESC, id DESC
             LIMIT $1"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn comments_for_article(&self, article_id: i64) -> Result<Vec<ContentItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM content_items
             WHERE kind = 'comment' AND article_id = $1
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(article_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn results_for(&self, content_id: i64) -> Result<Vec<AnalysisResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results
             WHERE content_item_id = $1
             ORDER BY id DESC"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(content_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn recent_results(&self, limit: u32) -> Result<Vec<AnalysisResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results
             ORDER BY id DESC
             LIMIT $1"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx_core::query::query(
            "SELECT
                COUNT(*)::bigint,
                COUNT(*) FILTER (WHERE analyzed)::bigint,
                COUNT(*) FILTER (WHERE NOT analyzed AND flagged_reason IS NULL)::bigint,
                COUNT(*) FILTER (WHERE flagged_reason IS NOT NULL)::bigint,
                (SELECT COUNT(*) FROM analysis_results)::bigint
             FROM content_items",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreCounts {
            items: row.try_get(0)?,
            analyzed: row.try_get(1)?,
            pending: row.try_get(2)?,
            flagged: row.try_get(3)?,
            results: row.try_get(4)?,
        })
    }

    async fn insert_item(&self, item: &NewContentItem) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO content_items (kind, title, body, author_ref, article_id, parent_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(item.kind.as_str())
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.author_ref)
        .bind(item.article_id)
        .bind(item.parent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn attach_file(&self, file: &NewAttachedFile) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO attached_files
                (owner_content_id, display_name, stored_name, payload, mime_type)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(file.owner_content_id)
        .bind(&file.display_name)
        .bind(&file.stored_name)
        .bind(&file.payload)
        .bind(&file.mime_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx_core::query::query("SELECT value FROM pipeline_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO pipeline_state (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT(key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
