// Profanity endpoint client.
//
// The endpoint takes `{"text": "..."}` and answers
// `{"contains_profanity": bool, "confidence": number?}`. Providers that only
// send the boolean get a confidence of 1.0 or 0.0 to match it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::status_error;
use super::traits::{TextClassifier, TextVerdict};
use crate::error::{ModerationError, Result};

/// HTTP profanity classifier.
pub struct ProfanityClassifier {
    client: Client,
    url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter,
}

impl ProfanityClassifier {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        rate_limiter: RateLimiter,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            rate_limiter,
        })
    }
}

#[derive(Serialize)]
struct ProfanityRequest<'a> {
    text: &'a str,
}

/// The verdict field is required: a 2xx body without it (a quota notice,
/// an error envelope) is not a classification.
#[derive(Deserialize)]
struct ProfanityResponse {
    contains_profanity: bool,
    confidence: Option<f64>,
}

#[async_trait]
impl TextClassifier for ProfanityClassifier {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict> {
        if body.trim().is_empty() {
            return Err(ModerationError::invalid("no text to classify"));
        }

        self.rate_limiter.acquire().await;

        let mut request = self.client.post(&self.url).json(&ProfanityRequest { text: body });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &body));
        }

        let parsed: ProfanityResponse = response.json().await.map_err(|e| {
            ModerationError::unavailable(format!("unparseable profanity response: {e}"))
        })?;

        let confidence = parsed
            .confidence
            .unwrap_or(if parsed.contains_profanity { 1.0 } else { 0.0 })
            .clamp(0.0, 1.0);

        debug!(
            contains_profanity = parsed.contains_profanity,
            confidence,
            chars = body.chars().count(),
            "Scored text"
        );

        Ok(TextVerdict {
            contains_profanity: parsed.contains_profanity,
            confidence,
        })
    }

    fn name(&self) -> &str {
        "profanity"
    }
}
