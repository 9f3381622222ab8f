//! Fence-line directive annotation parsing.
//!
//! Parses the `{key: value, key: "quoted value"}` annotation that may follow
//! the language tag of a diagram fence:
//!
//! ````text
//! ```mermaid {theme: dark, width: 1200}
//! ````
//!
//! This module only produces a key/value mapping. Whether a key is known and
//! a value usable is decided by [`RenderOptions::resolve`](crate::RenderOptions::resolve).

use std::collections::BTreeMap;

/// Malformed directive annotation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    /// Text after the language tag that is not a `{...}` annotation.
    #[error("unexpected text after language tag: '{0}'")]
    UnexpectedText(String),
    /// Opening brace without a closing one.
    #[error("directive annotation is missing a closing '}}'")]
    Unclosed,
    /// Entry without a `key: value` separator.
    #[error("directive '{0}' is missing ':'")]
    MissingColon(String),
    /// Entry with an empty key.
    #[error("directive with empty key")]
    EmptyKey,
    /// Quoted value without a closing quote.
    #[error("directive '{0}' has an unterminated quoted value")]
    UnterminatedQuote(String),
}

/// Parse the text that follows the language tag on a fence line.
///
/// Empty input yields no directives. Any malformation discards the whole
/// annotation: partial results are never returned.
pub fn parse_annotation(text: &str) -> Result<BTreeMap<String, String>, DirectiveError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(BTreeMap::new());
    }

    let Some(inner) = text.strip_prefix('{') else {
        return Err(DirectiveError::UnexpectedText(text.to_owned()));
    };
    let Some(inner) = inner.strip_suffix('}') else {
        return Err(DirectiveError::Unclosed);
    };

    parse_entries(inner)
}

/// Parse comma-separated `key: value` entries (the annotation without braces).
fn parse_entries(s: &str) -> Result<BTreeMap<String, String>, DirectiveError> {
    let mut directives = BTreeMap::new();
    let mut remaining = s;

    loop {
        remaining = remaining.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if remaining.is_empty() {
            break;
        }

        let Some(colon) = remaining.find(':') else {
            return Err(DirectiveError::MissingColon(remaining.trim().to_owned()));
        };
        let key = remaining[..colon].trim();
        if key.is_empty() {
            return Err(DirectiveError::EmptyKey);
        }
        if key.contains(',') {
            let segment = key.split(',').next().unwrap_or(key);
            return Err(DirectiveError::MissingColon(segment.trim().to_owned()));
        }

        let (value, rest) = parse_value(remaining[colon + 1..].trim_start())
            .ok_or_else(|| DirectiveError::UnterminatedQuote(key.to_owned()))?;
        directives.insert(key.to_owned(), value.to_owned());
        remaining = rest;
    }

    Ok(directives)
}

/// Split one value off the front of `s`.
///
/// Supports `"value"`, `'value'` and bare values running to the next comma.
/// Returns `None` for an unterminated quote.
fn parse_value(s: &str) -> Option<(&str, &str)> {
    if let Some(quote) = s.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let stripped = &s[1..];
        let end = stripped.find(quote)?;
        return Some((&stripped[..end], &stripped[end + 1..]));
    }

    let end = s.find(',').unwrap_or(s.len());
    Some((s[..end].trim(), &s[end..]))
}
