// Scripted classifiers and store helpers shared by the pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::run::{Pipeline, PipelineConfig};
use crate::classify::{ImageClassifier, ImageVerdict, TextClassifier, TextVerdict};
use crate::db::models::{
    AnalysisResult, AttachedFile, ContentItem, ContentKind, NewAnalysisResult, NewAttachedFile,
    NewContentItem, StoreCounts,
};
use crate::db::sqlite::SqliteStore;
use crate::db::ContentStore;
use crate::error::{ModerationError, Result};

/// Text classifier driven by markers in the body:
/// `UNAVAILABLE` fails as unreachable, `INVALID` as bad input, and any
/// body containing `darn` is profane.
pub struct ScriptedText {
    calls: AtomicUsize,
    fail_first: usize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedText {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            gate: None,
        }
    }

    /// Blocks every call until the semaphore hands out a permit.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    /// Fails the first `n` calls as unavailable.
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for ScriptedText {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if call < self.fail_first || body.contains("UNAVAILABLE") {
            return Err(ModerationError::unavailable("scripted outage"));
        }
        if body.contains("INVALID") {
            return Err(ModerationError::invalid("scripted bad input"));
        }
        let profane = body.contains("darn");
        Ok(TextVerdict {
            contains_profanity: profane,
            confidence: if profane { 0.9 } else { 0.1 },
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Image classifier: payloads starting with `NSFW` score high and
/// payloads starting with `BAD` are rejected as bad input.
pub struct ScriptedImage {
    calls: AtomicUsize,
}

impl ScriptedImage {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for ScriptedImage {
    async fn classify_image(&self, payload: &[u8], _mime_type: &str) -> Result<ImageVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if payload.starts_with(b"BAD") {
            return Err(ModerationError::invalid("scripted undecodable image"));
        }
        let nsfw = payload.starts_with(b"NSFW");
        Ok(ImageVerdict {
            is_nsfw: nsfw,
            confidence: if nsfw { 0.95 } else { 0.05 },
        })
    }

    fn name(&self) -> &str {
        "scripted-image"
    }
}

/// Store wrapper whose pipeline writes and fetches can be made to fail
/// with a storage error. Everything else goes to the inner store.
pub struct FailingStore {
    inner: Arc<SqliteStore>,
    fail_fetch: AtomicBool,
    fetch_calls: AtomicUsize,
    // 0 means no item; row ids start at 1
    fail_record_for: AtomicI64,
    fail_flag: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_fetch: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            fail_record_for: AtomicI64::new(0),
            fail_flag: AtomicBool::new(false),
        }
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fail_record_for(&self, id: i64) {
        self.fail_record_for.store(id, Ordering::SeqCst);
    }

    pub fn fail_flag(&self, fail: bool) {
        self.fail_flag.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FailingStore {
    async fn table_count(&self) -> Result<i64> {
        self.inner.table_count().await
    }

    async fn fetch_unanalyzed(&self, limit: u32) -> Result<Vec<ContentItem>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ModerationError::storage("scripted fetch failure"));
        }
        self.inner.fetch_unanalyzed(limit).await
    }

    async fn mark_analyzed(&self, id: i64) -> Result<()> {
        self.inner.mark_analyzed(id).await
    }

    async fn persist_result(&self, result: &NewAnalysisResult) -> Result<i64> {
        self.inner.persist_result(result).await
    }

    async fn record_analysis(&self, result: &NewAnalysisResult) -> Result<i64> {
        if self.fail_record_for.load(Ordering::SeqCst) == result.content_item_id {
            return Err(ModerationError::storage("scripted write failure"));
        }
        self.inner.record_analysis(result).await
    }

    async fn flag_invalid(&self, id: i64, reason: &str) -> Result<()> {
        if self.fail_flag.load(Ordering::SeqCst) {
            return Err(ModerationError::storage("scripted flag failure"));
        }
        self.inner.flag_invalid(id, reason).await
    }

    async fn files_for(&self, content_id: i64) -> Result<Vec<AttachedFile>> {
        self.inner.files_for(content_id).await
    }

    async fn get_item(&self, id: i64) -> Result<Option<ContentItem>> {
        self.inner.get_item(id).await
    }

    async fn list_items(&self, limit: u32) -> Result<Vec<ContentItem>> {
        self.inner.list_items(limit).await
    }

    async fn comments_for_article(&self, article_id: i64) -> Result<Vec<ContentItem>> {
        self.inner.comments_for_article(article_id).await
    }

    async fn results_for(&self, content_id: i64) -> Result<Vec<AnalysisResult>> {
        self.inner.results_for(content_id).await
    }

    async fn recent_results(&self, limit: u32) -> Result<Vec<AnalysisResult>> {
        self.inner.recent_results(limit).await
    }

    async fn counts(&self) -> Result<StoreCounts> {
        self.inner.counts().await
    }

    async fn insert_item(&self, item: &NewContentItem) -> Result<i64> {
        self.inner.insert_item(item).await
    }

    async fn attach_file(&self, file: &NewAttachedFile) -> Result<i64> {
        self.inner.attach_file(file).await
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_state(key).await
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_state(key, value).await
    }
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

pub fn pipeline_with(store: Arc<dyn ContentStore>, text: Arc<dyn TextClassifier>) -> Pipeline {
    Pipeline::new(
        store,
        text,
        Arc::new(ScriptedImage::new()),
        PipelineConfig::default(),
    )
}

/// Insert a top-level comment and return its id.
pub async fn seed(store: &dyn ContentStore, body: &str) -> i64 {
    store
        .insert_item(&NewContentItem {
            kind: ContentKind::Comment,
            title: None,
            body: body.to_string(),
            author_ref: "tester".to_string(),
            article_id: None,
            parent_id: None,
        })
        .await
        .unwrap()
}

pub async fn attach(store: &dyn ContentStore, owner: i64, name: &str, mime: &str, payload: &[u8]) {
    store
        .attach_file(&NewAttachedFile {
            owner_content_id: owner,
            display_name: name.to_string(),
            stored_name: format!("{owner}-{name}"),
            payload: payload.to_vec(),
            mime_type: mime.to_string(),
        })
        .await
        .unwrap();
}
