// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the pipeline. They're separate from
// the database queries so classifiers and the aggregator can use them without
// depending on rusqlite or sqlx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of content a row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "article" => Some(ContentKind::Article),
            "comment" => Some(ContentKind::Comment),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An article or comment awaiting (or past) moderation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub kind: ContentKind,
    /// Articles carry a title; comments don't.
    pub title: Option<String>,
    /// Raw body as submitted, may contain HTML markup and entities.
    pub body: String,
    pub author_ref: String,
    /// For comments: the article they belong to.
    pub article_id: Option<i64>,
    /// For replies: the comment they answer.
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// The watermark. Flipped to true once a result has been persisted.
    pub analyzed: bool,
    /// Set when the item was skipped permanently for invalid input.
    pub flagged_reason: Option<String>,
}

impl ContentItem {
    /// The text a reader sees: the title (when there is one), then the body.
    /// Kept apart so nothing downstream glues the end of one onto the other.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .into_iter()
            .chain(std::iter::once(self.body.as_str()))
    }
}

/// A binary attachment owned by a content item (by id, never embedded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: i64,
    pub owner_content_id: i64,
    /// Name the uploader gave the file.
    pub display_name: String,
    /// Storage name assigned at upload time (unique per owner).
    pub stored_name: String,
    #[serde(skip_serializing)]
    pub payload: Vec<u8>,
    pub mime_type: String,
}

impl AttachedFile {
    /// Only image attachments are sent to the image classifier.
    pub fn is_image(&self) -> bool {
        self.mime_type.trim().to_ascii_lowercase().starts_with("image/")
    }
}

/// One moderation verdict for one content item. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub content_item_id: i64,
    pub contains_profanity: bool,
    pub is_nsfw: bool,
    pub contains_phone_pattern: bool,
    /// JSON document with per-classifier confidences and pattern matches.
    pub raw_classifier_notes: String,
    pub created_at: DateTime<Utc>,
}

/// A verdict ready to be persisted (id and timestamp assigned by the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysisResult {
    pub content_item_id: i64,
    pub contains_profanity: bool,
    pub is_nsfw: bool,
    pub contains_phone_pattern: bool,
    pub raw_classifier_notes: String,
}

/// Producer-side insert for a content row.
#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub kind: ContentKind,
    pub title: Option<String>,
    pub body: String,
    pub author_ref: String,
    pub article_id: Option<i64>,
    pub parent_id: Option<i64>,
}

/// Producer-side insert for an attachment.
#[derive(Debug, Clone)]
pub struct NewAttachedFile {
    pub owner_content_id: i64,
    pub display_name: String,
    pub stored_name: String,
    pub payload: Vec<u8>,
    pub mime_type: String,
}

/// Row counts for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub items: i64,
    pub analyzed: i64,
    pub pending: i64,
    pub flagged: i64,
    pub results: i64,
}
