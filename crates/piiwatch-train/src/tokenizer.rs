//! Offset tokenizer for label alignment.
//!
//! Contexts split into alphanumeric runs and single symbol units, each with
//! its byte span in the source string, wrapped in boundary markers the way
//! sequence-labeling runtimes frame their inputs. Marker units carry the
//! `(0, 0)` span and are excluded from training loss downstream.

pub const BOS_MARKER: &str = "[CLS]";
pub const EOS_MARKER: &str = "[SEP]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Byte offset span into the tokenized string; `(0, 0)` for markers.
    pub start: usize,
    pub end: usize,
    /// Structural boundary unit, not text.
    pub marker: bool,
}

impl Token {
    fn unit(text: &str, start: usize, end: usize) -> Self {
        Self {
            text: text.to_string(),
            start,
            end,
            marker: false,
        }
    }

    fn boundary(text: &str) -> Self {
        Self {
            text: text.to_string(),
            start: 0,
            end: 0,
            marker: true,
        }
    }
}

/// Split `text` into offset-carrying units framed by boundary markers.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = vec![Token::boundary(BOS_MARKER)];
    let mut run_start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            run_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = run_start.take() {
            tokens.push(Token::unit(&text[start..idx], start, idx));
        }
        if !ch.is_whitespace() {
            let end = idx + ch.len_utf8();
            tokens.push(Token::unit(&text[idx..end], idx, end));
        }
    }
    if let Some(start) = run_start {
        tokens.push(Token::unit(&text[start..], start, text.len()));
    }
    tokens.push(Token::boundary(EOS_MARKER));
    tokens
}
