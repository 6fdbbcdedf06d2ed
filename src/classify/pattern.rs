// Phone-number pattern detection. Local, synchronous, no network.
//
// Content bodies arrive as HTML, so `normalize` first strips markup and
// decodes entities (`&#48;` is a digit too). `detect` then looks for the
// fixed shape 2-3 digits, separator, 3-4 digits, separator, 4 digits, e.g.
// `010-1234-5678`, `02.123.4567`, `031 123 4567`. Matches glued to longer
// digit runs are rejected so account numbers and timestamps don't count.

use std::sync::LazyLock;

use regex_lite::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};

// One alternative per separator: both gaps must use the same one, so a
// stray number next to a phone number ("12 010-1234") doesn't join it.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[0-9]{2,3}-[0-9]{3,4}-[0-9]{4}|[0-9]{2,3}\.[0-9]{3,4}\.[0-9]{4}|[0-9]{2,3} [0-9]{3,4} [0-9]{4}",
    )
    .unwrap()
});

/// Elements whose boundaries separate words when rendered.
const BLOCK_ELEMENTS: &[&str] = &[
    "br", "p", "div", "li", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "section", "article",
];

/// Elements whose text is never shown to readers.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "template"];

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternHit {
    pub hit: bool,
    /// Matched substrings in order of appearance
    pub matches: Vec<String>,
}

/// Stateless phone-number detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector;

impl PatternDetector {
    /// Scan already-normalized text.
    pub fn detect(&self, text: &str) -> PatternHit {
        let mut matches = Vec::new();
        let mut pos = 0;
        while let Some(m) = PHONE_RE.find_at(text, pos) {
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            if before.is_some_and(|c| c.is_ascii_digit()) || after.is_some_and(|c| c.is_ascii_digit()) {
                // Glued to a longer digit run. A real number may still start
                // inside this span, so resume one digit (one byte) later.
                pos = m.start() + 1;
            } else {
                matches.push(m.as_str().to_string());
                pos = m.end();
            }
        }

        PatternHit {
            hit: !matches.is_empty(),
            matches,
        }
    }

    /// Strip markup, decode entities, and collapse whitespace.
    pub fn normalize(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let mut text = String::with_capacity(html.len());

        for node in fragment.root_element().descendants() {
            if let Some(element) = node.value().as_element() {
                if BLOCK_ELEMENTS.contains(&element.name()) {
                    text.push(' ');
                }
            } else if let Some(chunk) = node.value().as_text() {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                });
                if !hidden {
                    text.push_str(chunk);
                }
            }
        }

        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Normalize each part on its own and join them with a line break, which
    /// never counts as a separator, so digits at the end of one part can't
    /// combine with a number at the start of the next.
    pub fn normalize_parts<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        parts
            .into_iter()
            .map(|part| self.normalize(part))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Normalize, then scan. This is what the pipeline runs on item bodies.
    pub fn detect_in_html(&self, html: &str) -> PatternHit {
        self.detect(&self.normalize(html))
    }
}
