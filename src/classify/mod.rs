// Classification: trait-based abstraction over remote scorers plus the
// local phone-number detector.
//
// TextClassifier and ImageClassifier define the interface. The HTTP clients
// in this module implement them; the pipeline never knows which provider is
// behind the trait object. PatternDetector runs locally and never touches
// the network.

pub mod nsfw;
pub mod openai;
pub mod pattern;
pub mod profanity;
pub mod rate_limiter;
pub mod traits;

pub use pattern::{PatternDetector, PatternHit};
pub use traits::{Bounded, ImageClassifier, ImageVerdict, TextClassifier, TextVerdict};

use reqwest::StatusCode;

use crate::error::ModerationError;

/// Map a non-2xx classifier response onto the error taxonomy.
///
/// Only statuses that blame the request body count as invalid input. Auth
/// failures, throttling and server errors are the endpoint's problem, and
/// the item must stay in the queue for the next tick.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> ModerationError {
    let detail = format!("{provider} returned {status}: {}", body.trim());
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ModerationError::InvalidInput(detail),
        _ => ModerationError::ClassifierUnavailable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_blames_input_only_for_payload_statuses() {
        assert!(matches!(
            status_error("nsfw", StatusCode::UNPROCESSABLE_ENTITY, "bad image"),
            ModerationError::InvalidInput(_)
        ));
        assert!(matches!(
            status_error("nsfw", StatusCode::BAD_REQUEST, ""),
            ModerationError::InvalidInput(_)
        ));
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                status_error("profanity", status, ""),
                ModerationError::ClassifierUnavailable(_)
            ));
        }
    }
}
