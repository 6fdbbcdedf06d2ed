// OpenAI chat-completion text classifier.
//
// An alternative to the dedicated profanity endpoint: the model is asked to
// answer with a small JSON verdict, which we pull out of the first choice.
// Models sometimes wrap JSON in code fences or add a sentence around it, so
// parsing looks for the outermost object rather than requiring a clean body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::status_error;
use super::traits::{TextClassifier, TextVerdict};
use crate::error::{ModerationError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const INSTRUCTIONS: &str = "You are a content moderation classifier. Decide whether the user's \
text contains profanity, slurs, or sexually explicit language. Reply with only a JSON object \
of the form {\"contains_profanity\": true|false, \"confidence\": <number between 0 and 1>}.";

pub struct OpenAiTextClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAiTextClassifier {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
        rate_limiter: RateLimiter,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            rate_limiter,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    contains_profanity: bool,
    confidence: Option<f64>,
}

/// Extract the JSON verdict from a model reply.
pub fn parse_verdict(reply: &str) -> Option<TextVerdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawVerdict = serde_json::from_str(&reply[start..=end]).ok()?;
    let confidence = raw
        .confidence
        .unwrap_or(if raw.contains_profanity { 1.0 } else { 0.0 })
        .clamp(0.0, 1.0);
    Some(TextVerdict {
        contains_profanity: raw.contains_profanity,
        confidence,
    })
}

#[async_trait]
impl TextClassifier for OpenAiTextClassifier {
    async fn classify_text(&self, body: &str) -> Result<TextVerdict> {
        if body.trim().is_empty() {
            return Err(ModerationError::invalid("no text to classify"));
        }

        self.rate_limiter.acquire().await;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: INSTRUCTIONS,
                },
                ChatMessage {
                    role: "user",
                    content: body,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModerationError::unavailable(format!("unparseable OpenAI response: {e}")))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModerationError::unavailable("OpenAI response had no choices"))?;

        let verdict = parse_verdict(&reply).ok_or_else(|| {
            ModerationError::unavailable(format!("OpenAI reply was not a verdict: {reply:?}"))
        })?;

        debug!(
            model = %self.model,
            contains_profanity = verdict.contains_profanity,
            confidence = verdict.confidence,
            "Scored text"
        );

        Ok(verdict)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    fn classifier(server: &MockServer) -> OpenAiTextClassifier {
        OpenAiTextClassifier::new(
            &server.uri(),
            "sk-test".to_string(),
            DEFAULT_MODEL.to_string(),
            Duration::from_secs(5),
            RateLimiter::unlimited(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_plain_json() {
        let v = parse_verdict(r#"{"contains_profanity": true, "confidence": 0.8}"#).unwrap();
        assert!(v.contains_profanity);
        assert!((v.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_fenced_json() {
        let v = parse_verdict("```json\n{\"contains_profanity\": false}\n```").unwrap();
        assert!(!v.contains_profanity);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_verdict("I think this text is fine.").is_none());
        assert!(parse_verdict("} nope {").is_none());
        assert!(parse_verdict(r#"{"profane": true}"#).is_none());
    }

    #[tokio::test]
    async fn test_classify_via_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"contains_profanity": true, "confidence": 0.97}"#,
            )))
            .mount(&server)
            .await;

        let verdict = classifier(&server).classify_text("some text").await.unwrap();
        assert!(verdict.contains_profanity);
    }

    #[tokio::test]
    async fn test_unusable_reply_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Sorry, I can't.")))
            .mount(&server)
            .await;

        let err = classifier(&server).classify_text("some text").await.unwrap_err();
        assert!(matches!(err, ModerationError::ClassifierUnavailable(_)));
    }

    #[tokio::test]
    async fn test_bad_key_is_unavailable_not_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = classifier(&server).classify_text("some text").await.unwrap_err();
        assert!(matches!(err, ModerationError::ClassifierUnavailable(_)));
    }
}
