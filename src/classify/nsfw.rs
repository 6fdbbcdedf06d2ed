// NSFW endpoint client.
//
// Images are uploaded as multipart form data under the `image` field; the
// endpoint answers `{"nsfw_score": number}`. Scores above the configured
// threshold (default 0.5) count as NSFW.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::status_error;
use super::traits::{ImageClassifier, ImageVerdict};
use crate::error::{ModerationError, Result};

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// HTTP NSFW image classifier.
pub struct NsfwClassifier {
    client: Client,
    url: String,
    api_key: Option<String>,
    threshold: f64,
    rate_limiter: RateLimiter,
}

impl NsfwClassifier {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        threshold: f64,
        timeout: Duration,
        rate_limiter: RateLimiter,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            threshold,
            rate_limiter,
        })
    }
}

#[derive(Deserialize)]
struct NsfwResponse {
    nsfw_score: f64,
}

/// File name sent with the upload, derived from the mime subtype.
fn upload_name(mime_type: &str) -> String {
    let ext = mime_type
        .split('/')
        .nth(1)
        .and_then(|sub| sub.split(';').next())
        .map(str::trim)
        .filter(|sub| !sub.is_empty())
        .unwrap_or("bin");
    format!("upload.{ext}")
}

#[async_trait]
impl ImageClassifier for NsfwClassifier {
    async fn classify_image(&self, payload: &[u8], mime_type: &str) -> Result<ImageVerdict> {
        if payload.is_empty() {
            return Err(ModerationError::invalid("empty image payload"));
        }
        if !mime_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(ModerationError::invalid(format!(
                "not an image mime type: {mime_type:?}"
            )));
        }

        self.rate_limiter.acquire().await;

        let part = Part::bytes(payload.to_vec())
            .file_name(upload_name(mime_type))
            .mime_str(mime_type)
            .map_err(|e| ModerationError::invalid(format!("bad mime type {mime_type:?}: {e}")))?;
        let form = Form::new().part("image", part);

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &body));
        }

        let parsed: NsfwResponse = response
            .json()
            .await
            .map_err(|e| ModerationError::unavailable(format!("unparseable NSFW response: {e}")))?;

        let score = parsed.nsfw_score.clamp(0.0, 1.0);
        debug!(nsfw_score = score, bytes = payload.len(), "Scored image");

        Ok(ImageVerdict {
            is_nsfw: score > self.threshold,
            confidence: score,
        })
    }

    fn name(&self) -> &str {
        "nsfw"
    }
}
