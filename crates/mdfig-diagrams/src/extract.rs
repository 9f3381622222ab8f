//! Fenced diagram block extraction.
//!
//! The extractor walks the document line by line and tracks fenced code
//! blocks (backtick or tilde, three or more characters). Every fence is a
//! peer: a diagram-tagged fence inside another fence is ordinary content of
//! that fence, and fences are never nested. Only closed fences whose
//! language tag is a configured diagram language become [`DiagramBlock`]s.
//!
//! Offsets are byte offsets into the original text. A block span runs from
//! the first byte of the opening fence line to the last byte of the closing
//! fence marker, excluding the line terminator, so replacing the span keeps
//! the surrounding line structure intact.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::consts::DEFAULT_LANGUAGE;
use crate::directive::parse_annotation;

/// A fenced diagram block found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBlock {
    /// Fence body exactly as written, including its trailing newline.
    pub raw_code: String,
    /// Byte offset of the opening fence line.
    pub start_offset: usize,
    /// Byte offset just past the closing fence marker.
    pub end_offset: usize,
    /// Zero-based position among the diagram blocks of the document.
    pub index: usize,
    /// Language tag of the fence (e.g. `mermaid`).
    pub language: String,
    /// Directives parsed from the fence annotation.
    pub directives: BTreeMap<String, String>,
    /// Problems found while parsing the annotation.
    pub anomalies: Vec<String>,
    /// Document the block was extracted from.
    pub document_id: String,
}

impl DiagramBlock {
    /// Diagram source handed to the renderer (body without surrounding whitespace).
    #[must_use]
    pub fn source(&self) -> &str {
        self.raw_code.trim()
    }

    /// Byte range of the whole fenced region.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start_offset..self.end_offset
    }
}

/// Finds diagram blocks in document text.
#[derive(Debug, Clone)]
pub struct BlockExtractor {
    languages: Vec<String>,
}

impl Default for BlockExtractor {
    fn default() -> Self {
        Self::new([DEFAULT_LANGUAGE])
    }
}

/// Fence currently open while scanning.
struct OpenFence {
    fence_char: char,
    fence_len: usize,
    start: usize,
    body_start: usize,
    /// Language and annotation when this fence is a diagram.
    diagram: Option<(String, String)>,
}

impl BlockExtractor {
    /// Create an extractor recognizing the given fence languages.
    #[must_use]
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: languages.into_iter().map(Into::into).collect(),
        }
    }

    /// Languages this extractor treats as diagrams.
    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Extract every closed diagram block in `text`, in document order.
    #[must_use]
    pub fn extract(&self, document_id: &str, text: &str) -> Vec<DiagramBlock> {
        let mut blocks = Vec::new();
        let mut open: Option<OpenFence> = None;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            let content = line.trim_end_matches(['\n', '\r']);
            let trimmed = content.trim_start();

            if let Some(fence) = open.take() {
                if !is_closing_fence(trimmed, fence.fence_char, fence.fence_len) {
                    open = Some(fence);
                    continue;
                }
                let index = blocks.len();
                blocks.extend(make_block(
                    document_id,
                    text,
                    fence,
                    line_start,
                    line_start + content.len(),
                    index,
                ));
                continue;
            }

            if let Some((fence_char, fence_len)) = detect_fence(trimmed) {
                let info = trimmed[fence_len..].trim();
                // Backtick fences cannot carry backticks in their info string
                if fence_char == '`' && info.contains('`') {
                    continue;
                }
                let (language, annotation) = split_info(info);
                let diagram = self
                    .languages
                    .iter()
                    .any(|l| l == language)
                    .then(|| (language.to_owned(), annotation.to_owned()));
                open = Some(OpenFence {
                    fence_char,
                    fence_len,
                    start: line_start,
                    body_start: offset,
                    diagram,
                });
            }
        }

        if let Some(OpenFence {
            diagram: Some((language, _)),
            start,
            ..
        }) = open
        {
            tracing::debug!(
                document = document_id,
                offset = start,
                language = %language,
                "unterminated diagram fence left as text"
            );
        }

        blocks
    }
}

/// Build a block from a closed fence, if it is a diagram fence.
///
/// `body_end` is the start of the closing fence line.
fn make_block(
    document_id: &str,
    text: &str,
    fence: OpenFence,
    body_end: usize,
    end_offset: usize,
    index: usize,
) -> Option<DiagramBlock> {
    let (language, annotation) = fence.diagram?;
    let (directives, anomalies) = match parse_annotation(&annotation) {
        Ok(directives) => (directives, Vec::new()),
        Err(e) => (BTreeMap::new(), vec![e.to_string()]),
    };

    Some(DiagramBlock {
        raw_code: text[fence.body_start..body_end].to_owned(),
        start_offset: fence.start,
        end_offset,
        index,
        language,
        directives,
        anomalies,
        document_id: document_id.to_owned(),
    })
}

/// Split a fence info string into language tag and the rest.
///
/// The tag ends at the first whitespace or `{`, so both `mermaid {theme: dark}`
/// and `mermaid{theme: dark}` are recognized.
fn split_info(info: &str) -> (&str, &str) {
    let end = info
        .find(|c: char| c.is_whitespace() || c == '{')
        .unwrap_or(info.len());
    (&info[..end], &info[end..])
}

/// Detect if a line starts a code fence.
///
/// Returns the fence character and length if found.
fn detect_fence(trimmed: &str) -> Option<(char, usize)> {
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }

    let count = trimmed.chars().take_while(|&c| c == first).count();
    (count >= 3).then_some((first, count))
}

/// Check if a line is a valid closing fence.
///
/// The closing fence must use the same character as the opening one, be at
/// least as long, and be followed by nothing but whitespace.
fn is_closing_fence(trimmed: &str, expected_char: char, min_len: usize) -> bool {
    if !trimmed.starts_with(expected_char) {
        return false;
    }

    let count = trimmed.chars().take_while(|&c| c == expected_char).count();
    count >= min_len && trimmed[count..].chars().all(char::is_whitespace)
}
