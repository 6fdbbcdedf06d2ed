// Verdict aggregation: fold one item's classifier outputs into a result row.
//
// Each signal passes through unchanged. There is no weighting or voting;
// downstream consumers decide what a combination of flags means.

use serde::{Deserialize, Serialize};

use crate::classify::{ImageVerdict, PatternHit, TextVerdict};
use crate::db::models::{ContentItem, NewAnalysisResult};

/// Shape of `raw_classifier_notes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierNotes {
    pub text_confidence: f64,
    /// `None` when the item had no image attachments
    pub image_confidence: Option<f64>,
    pub phone_matches: Vec<String>,
}

/// Combine the per-item findings into one verdict record.
///
/// Items without images never count as NSFW.
pub fn aggregate(
    item: &ContentItem,
    text: &TextVerdict,
    image: Option<&ImageVerdict>,
    pattern: &PatternHit,
) -> NewAnalysisResult {
    let notes = ClassifierNotes {
        text_confidence: text.confidence,
        image_confidence: image.map(|v| v.confidence),
        phone_matches: pattern.matches.clone(),
    };

    NewAnalysisResult {
        content_item_id: item.id,
        contains_profanity: text.contains_profanity,
        is_nsfw: image.is_some_and(|v| v.is_nsfw),
        contains_phone_pattern: pattern.hit,
        // Serializing a struct of plain fields can't fail
        raw_classifier_notes: serde_json::to_string(&notes).unwrap_or_default(),
    }
}
