// Classifier traits: the swap-ready abstraction over remote scorers.
//
// The pipeline only sees TextClassifier and ImageClassifier. Concrete HTTP
// clients (profanity endpoint, OpenAI, NSFW endpoint) implement them, and
// tests plug in scripted stubs. Every call is one logical operation: no
// partial results, no retries here (retry policy lives in the pipeline).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ModerationError, Result};

/// Default per-call bound for remote classifiers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of scoring one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextVerdict {
    pub contains_profanity: bool,
    /// 0.0 to 1.0, as reported by the provider
    pub confidence: f64,
}

/// Outcome of scoring one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageVerdict {
    pub is_nsfw: bool,
    /// 0.0 to 1.0, as reported by the provider
    pub confidence: f64,
}

impl ImageVerdict {
    /// Fold several per-image verdicts into one for the item: NSFW if any
    /// image is, with the highest confidence seen. `None` for no images.
    pub fn combine(verdicts: &[ImageVerdict]) -> Option<ImageVerdict> {
        verdicts.iter().copied().reduce(|acc, v| ImageVerdict {
            is_nsfw: acc.is_nsfw || v.is_nsfw,
            confidence: acc.confidence.max(v.confidence),
        })
    }
}

/// Scores text for profanity. Implementations are async because most
/// providers are HTTP APIs.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict>;

    /// Short provider name for logs and notes.
    fn name(&self) -> &str;
}

/// Scores an image payload for NSFW content.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify_image(&self, payload: &[u8], mime_type: &str) -> Result<ImageVerdict>;

    fn name(&self) -> &str;
}

/// Run `fut`, failing with ClassifierUnavailable if it takes longer than `limit`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ModerationError::ClassifierUnavailable(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Decorator that bounds every call of the wrapped classifier.
pub struct Bounded<C> {
    inner: C,
    timeout: Duration,
}

impl<C> Bounded<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<C: TextClassifier> TextClassifier for Bounded<C> {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict> {
        with_timeout(self.timeout, self.inner.name(), self.inner.classify_text(body)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl<C: ImageClassifier> ImageClassifier for Bounded<C> {
    async fn classify_image(&self, payload: &[u8], mime_type: &str) -> Result<ImageVerdict> {
        with_timeout(
            self.timeout,
            self.inner.name(),
            self.inner.classify_image(payload, mime_type),
        )
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
