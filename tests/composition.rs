// Composition tests: the pipeline end to end over a real (in-memory) store.
//
// These tests exercise the data flow between modules:
//   ContentStore -> classifiers -> pattern detector -> aggregate -> ContentStore
// with scripted classifiers standing in for the HTTP endpoints.

#![cfg(feature = "sqlite")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use vigil::classify::{ImageClassifier, ImageVerdict, PatternHit, TextClassifier, TextVerdict};
use vigil::db::models::{ContentKind, NewAnalysisResult, NewAttachedFile, NewContentItem};
use vigil::db::sqlite::SqliteStore;
use vigil::db::thread::build_thread;
use vigil::db::ContentStore;
use vigil::error::{ModerationError, Result};
use vigil::pipeline::{aggregate, ItemOutcome, Pipeline, PipelineConfig, TickOutcome, TickReport};

// ============================================================
// Scripted collaborators
// ============================================================

/// Profane when the text mentions "heck"; unreachable when it says "OUTAGE".
struct KeywordText {
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl TextClassifier for KeywordText {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if body.contains("OUTAGE") {
            return Err(ModerationError::unavailable("connection refused"));
        }
        Ok(TextVerdict {
            contains_profanity: body.contains("heck"),
            confidence: 0.8,
        })
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// NSFW when the payload starts with `NSFW`; undecodable when it starts with `BAD`.
#[derive(Default)]
struct MagicBytesImage {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageClassifier for MagicBytesImage {
    async fn classify_image(&self, payload: &[u8], _mime_type: &str) -> Result<ImageVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if payload.starts_with(b"BAD") {
            return Err(ModerationError::invalid("cannot decode image"));
        }
        let nsfw = payload.starts_with(b"NSFW");
        Ok(ImageVerdict {
            is_nsfw: nsfw,
            confidence: if nsfw { 0.9 } else { 0.2 },
        })
    }

    fn name(&self) -> &str {
        "magic-bytes"
    }
}

fn store() -> Arc<dyn ContentStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

fn pipeline(store: &Arc<dyn ContentStore>) -> Pipeline {
    Pipeline::new(
        store.clone(),
        Arc::new(KeywordText { gate: None }),
        Arc::new(MagicBytesImage::default()),
        PipelineConfig::default(),
    )
}

fn completed(outcome: TickOutcome) -> TickReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        TickOutcome::Suppressed => panic!("run was suppressed"),
    }
}

async fn add(
    store: &dyn ContentStore,
    kind: ContentKind,
    body: &str,
    article_id: Option<i64>,
    parent_id: Option<i64>,
) -> i64 {
    store
        .insert_item(&NewContentItem {
            kind,
            title: (kind == ContentKind::Article).then(|| "Weekly thread".to_string()),
            body: body.to_string(),
            author_ref: "member".to_string(),
            article_id,
            parent_id,
        })
        .await
        .unwrap()
}

async fn attach(store: &dyn ContentStore, owner: i64, name: &str, mime: &str, payload: &[u8]) {
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

// ============================================================
// Chain: store -> classify -> aggregate -> store
// ============================================================

#[tokio::test]
async fn board_with_comments_is_fully_screened() {
    let store = store();
    let article = add(&*store, ContentKind::Article, "<p>Post your photos</p>", None, None).await;
    let clean = add(&*store, ContentKind::Comment, "lovely", Some(article), None).await;
    let phone = add(
        &*store,
        ContentKind::Comment,
        "dm me at 010&#45;1234&#45;5678",
        Some(article),
        Some(clean),
    )
    .await;
    let rude = add(&*store, ContentKind::Comment, "what the heck", Some(article), None).await;
    attach(&*store, article, "sunset.png", "image/png", b"sunset").await;
    attach(&*store, rude, "oops.jpg", "image/jpeg", b"NSFW!").await;

    let report = completed(pipeline(&store).run_once().await.unwrap());
    assert_eq!(report.fetched, 4);
    assert_eq!(report.analyzed, 4);

    let verdict = |id: i64| {
        let store = store.clone();
        async move { store.results_for(id).await.unwrap().remove(0) }
    };

    let a = verdict(article).await;
    assert!(!a.contains_profanity && !a.is_nsfw && !a.contains_phone_pattern);

    let p = verdict(phone).await;
    assert!(p.contains_phone_pattern);
    assert!(!p.contains_profanity);

    let r = verdict(rude).await;
    assert!(r.contains_profanity);
    assert!(r.is_nsfw);

    // The reply lands under the comment it answered
    let thread = build_thread(store.comments_for_article(article).await.unwrap());
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].comment.id, clean);
    assert_eq!(thread[0].replies[0].comment.id, phone);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.analyzed, 4);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.results, 4);
}

#[tokio::test]
async fn one_outage_does_not_sink_the_batch() {
    let store = store();
    let a = add(&*store, ContentKind::Article, "alpha", None, None).await;
    let b = add(&*store, ContentKind::Article, "beta OUTAGE", None, None).await;
    let c = add(&*store, ContentKind::Article, "gamma", None, None).await;

    let report = completed(pipeline(&store).run_once().await.unwrap());
    assert_eq!(report.analyzed, 2);
    assert!(matches!(report.outcome_for(b), Some(ItemOutcome::Deferred { .. })));

    for (id, analyzed) in [(a, true), (b, false), (c, true)] {
        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.analyzed, analyzed, "item {id}");
        assert_eq!(store.results_for(id).await.unwrap().is_empty(), !analyzed);
    }
}

#[tokio::test]
async fn undecodable_image_flags_its_item_only() {
    let store = store();
    let broken = add(&*store, ContentKind::Article, "see attached", None, None).await;
    attach(&*store, broken, "x.png", "image/png", b"BAD").await;
    let fine = add(&*store, ContentKind::Article, "no attachments", None, None).await;

    let p = pipeline(&store);
    let report = completed(p.run_once().await.unwrap());
    assert_eq!(report.flagged, 1);
    assert_eq!(report.analyzed, 1);
    assert!(matches!(report.outcome_for(broken), Some(ItemOutcome::Flagged { .. })));
    assert!(matches!(report.outcome_for(fine), Some(ItemOutcome::Analyzed { .. })));

    // Flagged items leave the queue for good
    let next = completed(p.run_once().await.unwrap());
    assert_eq!(next.fetched, 0);
    assert_eq!(store.counts().await.unwrap().flagged, 1);
}

#[tokio::test]
async fn reanalysis_appends_rather_than_overwrites() {
    let store = store();
    let id = add(&*store, ContentKind::Article, "hello", None, None).await;
    completed(pipeline(&store).run_once().await.unwrap());

    let second = NewAnalysisResult {
        content_item_id: id,
        contains_profanity: true,
        is_nsfw: false,
        contains_phone_pattern: false,
        raw_classifier_notes: "{}".to_string(),
    };
    let second_id = store.record_analysis(&second).await.unwrap();

    let results = store.results_for(id).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, second_id);
    assert!(!results[1].contains_profanity);
    assert!(store.get_item(id).await.unwrap().unwrap().analyzed);
}

#[tokio::test]
async fn concurrent_runs_never_overlap() {
    let store = store();
    add(&*store, ContentKind::Article, "one", None, None).await;
    add(&*store, ContentKind::Article, "two", None, None).await;

    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(KeywordText {
            gate: Some(gate.clone()),
        }),
        Arc::new(MagicBytesImage::default()),
        PipelineConfig::default(),
    ));

    let first = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run_once().await }
    });
    while !pipeline.is_running() {
        tokio::task::yield_now().await;
    }

    let contenders: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run_once().await })
        })
        .collect();
    for handle in contenders {
        assert_eq!(handle.await.unwrap().unwrap(), TickOutcome::Suppressed);
    }

    gate.add_permits(2);
    let report = completed(first.await.unwrap().unwrap());
    assert_eq!(report.analyzed, 2);

    // Every item got exactly one result
    assert_eq!(store.counts().await.unwrap().results, 2);
}

#[tokio::test]
async fn non_image_attachments_skip_the_image_classifier() {
    let store = store();
    let id = add(&*store, ContentKind::Article, "minutes attached", None, None).await;
    attach(&*store, id, "minutes.pdf", "application/pdf", b"NSFW-looking bytes").await;

    let image = Arc::new(MagicBytesImage::default());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(KeywordText { gate: None }),
        image.clone(),
        PipelineConfig::default(),
    );
    completed(pipeline.run_once().await.unwrap());

    assert_eq!(image.calls.load(Ordering::SeqCst), 0);
    assert!(!store.results_for(id).await.unwrap()[0].is_nsfw);
}

// ============================================================
// Aggregator against a stored item
// ============================================================

#[tokio::test]
async fn aggregate_passes_profanity_through_alone() {
    let store = store();
    let id = add(&*store, ContentKind::Article, "text", None, None).await;
    let item = store.get_item(id).await.unwrap().unwrap();

    let result = aggregate(
        &item,
        &TextVerdict {
            contains_profanity: true,
            confidence: 0.99,
        },
        None,
        &PatternHit::default(),
    );

    assert_eq!(result.content_item_id, id);
    assert!(result.contains_profanity);
    assert!(!result.is_nsfw);
    assert!(!result.contains_phone_pattern);
}
