// ContentStore trait: backend-agnostic async interface for all storage.
//
// Implementors: SqliteStore (wraps rusqlite), PgStore (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface. The pipeline only ever
// holds an `Arc<dyn ContentStore>`.

use async_trait::async_trait;

use super::models::{
    AnalysisResult, AttachedFile, ContentItem, NewAnalysisResult, NewAttachedFile,
    NewContentItem, StoreCounts,
};
use crate::error::Result;

#[async_trait]
pub trait ContentStore: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Pipeline contract ---

    /// Unanalyzed, unflagged items, oldest first, at most `limit` of them.
    async fn fetch_unanalyzed(&self, limit: u32) -> Result<Vec<ContentItem>>;

    /// Set the analyzed watermark. Fails with `NotFound` for unknown ids.
    async fn mark_analyzed(&self, id: i64) -> Result<()>;

    /// Append a result row and return its ID.
    async fn persist_result(&self, result: &NewAnalysisResult) -> Result<i64>;

    /// Append a result and set the watermark atomically.
    ///
    /// This is what the pipeline calls: either both writes are durable or
    /// neither is. Fails with `NotFound` (writing nothing) for unknown ids.
    async fn record_analysis(&self, result: &NewAnalysisResult) -> Result<i64>;

    /// Take an item out of the queue for good, without a result.
    async fn flag_invalid(&self, id: i64, reason: &str) -> Result<()>;

    /// Attachments owned by an item, in upload order.
    async fn files_for(&self, content_id: i64) -> Result<Vec<AttachedFile>>;

    // --- Read paths ---

    async fn get_item(&self, id: i64) -> Result<Option<ContentItem>>;

    /// Most recent items first.
    async fn list_items(&self, limit: u32) -> Result<Vec<ContentItem>>;

    /// An article's comments as a flat sequence in creation order.
    async fn comments_for_article(&self, article_id: i64) -> Result<Vec<ContentItem>>;

    /// All results for an item, newest first.
    async fn results_for(&self, content_id: i64) -> Result<Vec<AnalysisResult>>;

    async fn recent_results(&self, limit: u32) -> Result<Vec<AnalysisResult>>;

    async fn counts(&self) -> Result<StoreCounts>;

    // --- Producer writes ---

    async fn insert_item(&self, item: &NewContentItem) -> Result<i64>;

    async fn attach_file(&self, file: &NewAttachedFile) -> Result<i64>;

    // --- Pipeline state ---

    /// Get a pipeline state value by key (e.g., "last_tick_at").
    async fn get_state(&self, key: &str) -> Result<Option<String>>;

    /// Set a pipeline state value (upsert).
    async fn set_state(&self, key: &str, value: &str) -> Result<()>;
}
