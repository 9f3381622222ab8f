//! Span-based document rewriting.

use std::ops::Range;

/// Collects span replacements and applies them to a document.
///
/// Spans are byte ranges into the original text. They are applied in
/// descending start order, so each substitution only moves text that comes
/// after it and every span still to be applied keeps its recorded offsets.
#[derive(Debug, Default)]
pub struct Replacements {
    items: Vec<(Range<usize>, String)>,
}

impl Replacements {
    /// Create an empty set of replacements.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `capacity` replacements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Replace `span` of the original text with `text`.
    pub fn add(&mut self, span: Range<usize>, text: String) {
        self.items.push((span, text));
    }

    /// Number of collected replacements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no replacements were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply all replacements to `original`.
    ///
    /// Text outside the replaced spans is copied unchanged. Spans that are out
    /// of bounds, split a UTF-8 character, or overlap a span already applied
    /// are skipped with a warning.
    #[must_use]
    pub fn apply(mut self, original: &str) -> String {
        if self.items.is_empty() {
            return original.to_owned();
        }

        self.items.sort_by(|a, b| b.0.start.cmp(&a.0.start));

        let mut result = original.to_owned();
        // Everything at or after `limit` has already been rewritten
        let mut limit = original.len();
        for (span, text) in self.items {
            let valid = span.start <= span.end
                && span.end <= limit
                && original.is_char_boundary(span.start)
                && original.is_char_boundary(span.end);
            if !valid {
                tracing::warn!(
                    start = span.start,
                    end = span.end,
                    "skipping invalid or overlapping replacement span"
                );
                continue;
            }
            result.replace_range(span.clone(), &text);
            limit = span.start;
        }
        result
    }
}
