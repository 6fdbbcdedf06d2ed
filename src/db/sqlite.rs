// SqliteStore: rusqlite backend implementing the ContentStore trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// SQL helper errors (anyhow) become ModerationError::Storage via `?`.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    AnalysisResult, AttachedFile, ContentItem, NewAnalysisResult, NewAttachedFile,
    NewContentItem, StoreCounts,
};
use super::queries;
use super::traits::ContentStore;
use crate::error::{ModerationError, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Fresh in-memory store with the schema applied. Used by tests and demos.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(super::schema::table_count(&conn)?)
    }

    async fn fetch_unanalyzed(&self, limit: u32) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().await;
        Ok(queries::fetch_unanalyzed(&conn, limit)?)
    }

    async fn mark_analyzed(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        if queries::mark_analyzed(&conn, id)? {
            Ok(())
        } else {
            Err(ModerationError::NotFound(id))
        }
    }

    async fn persist_result(&self, result: &NewAnalysisResult) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(queries::insert_result(&conn, result, Utc::now())?)
    }

    async fn record_analysis(&self, result: &NewAnalysisResult) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::record_analysis(&conn, result, Utc::now())?
            .ok_or(ModerationError::NotFound(result.content_item_id))
    }

    async fn flag_invalid(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        if queries::flag_invalid(&conn, id, reason)? {
            Ok(())
        } else {
            Err(ModerationError::NotFound(id))
        }
    }

    async fn files_for(&self, content_id: i64) -> Result<Vec<AttachedFile>> {
        let conn = self.conn.lock().await;
        Ok(queries::files_for(&conn, content_id)?)
    }

    async fn get_item(&self, id: i64) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().await;
        Ok(queries::get_item(&conn, id)?)
    }

    async fn list_items(&self, limit: u32) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().await;
        Ok(queries::list_items(&conn, limit)?)
    }

    async fn comments_for_article(&self, article_id: i64) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().await;
        Ok(queries::comments_for_article(&conn, article_id)?)
    }

    async fn results_for(&self, content_id: i64) -> Result<Vec<AnalysisResult>> {
        let conn = self.conn.lock().await;
        Ok(queries::results_for(&conn, content_id)?)
    }

    async fn recent_results(&self, limit: u32) -> Result<Vec<AnalysisResult>> {
        let conn = self.conn.lock().await;
        Ok(queries::recent_results(&conn, limit)?)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().await;
        Ok(queries::counts(&conn)?)
    }

    async fn insert_item(&self, item: &NewContentItem) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(queries::insert_item(&conn, item, Utc::now())?)
    }

    async fn attach_file(&self, file: &NewAttachedFile) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(queries::attach_file(&conn, file)?)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(queries::get_state(&conn, key)?)
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        Ok(queries::set_state(&conn, key, value)?)
    }
}
