//! Character-span to token-tag alignment.
//!
//! A confirmed leak arrives as `(context, content)`; training needs one tag
//! per token. The content is located as an exact substring of the context.
//! A fuzzy match would risk training the model on the wrong span, so absent
//! content means the record is skipped, never guessed.

use serde::Serialize;

use crate::tokenizer::{tokenize, Token};

/// IOB2 tags plus the loss-exclusion sentinel for boundary markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tag {
    #[serde(rename = "O")]
    Outside,
    #[serde(rename = "B-PII")]
    Begin,
    #[serde(rename = "I-PII")]
    Inside,
    #[serde(rename = "IGN")]
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSequence {
    pub tokens: Vec<Token>,
    pub tags: Vec<Tag>,
}

impl TaggedSequence {
    /// Decode the tag sequence back into byte spans: each `Begin` opens a
    /// span extended by contiguous `Inside` units.
    pub fn spans(&self) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for (token, tag) in self.tokens.iter().zip(&self.tags) {
            match tag {
                Tag::Begin => spans.push((token.start, token.end)),
                Tag::Inside => {
                    if let Some(last) = spans.last_mut() {
                        last.1 = token.end;
                    }
                }
                Tag::Outside | Tag::Ignore => {}
            }
        }
        spans
    }
}

/// Tag every token of `context` against the first exact occurrence of
/// `content`. Returns `None` when the content cannot be located (or either
/// side is empty); callers skip such records with a warning.
pub fn align(context: &str, content: &str) -> Option<TaggedSequence> {
    if context.is_empty() || content.is_empty() {
        return None;
    }
    let start = context.find(content)?;
    let end = start + content.len();

    let tokens = tokenize(context);
    let mut tags = Vec::with_capacity(tokens.len());
    let mut open = false;
    for token in &tokens {
        if token.marker {
            tags.push(Tag::Ignore);
            continue;
        }
        // Only units lying entirely within the span are labelled; a unit
        // straddling the span edge stays OUTSIDE and resets the tracker, so
        // a later fully-contained unit starts a fresh BEGIN.
        if token.start >= start && token.end <= end {
            tags.push(if open { Tag::Inside } else { Tag::Begin });
            open = true;
        } else {
            tags.push(Tag::Outside);
            open = false;
        }
    }
    Some(TaggedSequence { tokens, tags })
}
