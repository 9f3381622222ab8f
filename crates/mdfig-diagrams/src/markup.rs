//! Image reference markup for rendered diagrams.

use crate::consts::IMAGE_ALT;

/// Generates the text that replaces a rendered diagram block.
///
/// Implement this trait to customize how images are referenced (e.g. HTML
/// `<img>` tags instead of markdown).
pub trait ImageMarkup: Send + Sync {
    /// Markup referencing the image at `link` (relative to the page).
    fn image_reference(&self, link: &str) -> String;
}

/// Markdown image syntax: `![alt](link)`.
#[derive(Debug, Clone)]
pub struct MarkdownImage {
    alt: String,
}

impl MarkdownImage {
    /// Create a generator using `alt` as alt text.
    #[must_use]
    pub fn new(alt: impl Into<String>) -> Self {
        Self { alt: alt.into() }
    }
}

impl Default for MarkdownImage {
    fn default() -> Self {
        Self::new(IMAGE_ALT)
    }
}

impl ImageMarkup for MarkdownImage {
    fn image_reference(&self, link: &str) -> String {
        format!("![{}]({link})", self.alt)
    }
}

/// Link from a page to an image file, relative to the page's directory.
///
/// `output_dir` is the image directory relative to the site root. One `../`
/// is prepended per directory level of `document_id`:
///
/// ```
/// use mdfig_diagrams::relative_link;
///
/// assert_eq!(relative_link("index.md", "assets/images", "ab.png"), "assets/images/ab.png");
/// assert_eq!(relative_link("guide/intro.md", "assets/images", "ab.png"), "../assets/images/ab.png");
/// ```
#[must_use]
pub fn relative_link(document_id: &str, output_dir: &str, file_name: &str) -> String {
    let depth = document_id
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .count()
        .saturating_sub(1);
    let output_dir = output_dir.trim_matches('/');

    let mut link = "../".repeat(depth);
    if !output_dir.is_empty() {
        link.push_str(output_dir);
        link.push('/');
    }
    link.push_str(file_name);
    link
}

/// Replacement text for a rendered block.
///
/// With `original` set, the original fenced block follows the image
/// reference after a blank line.
#[must_use]
pub fn replacement_text(reference: String, original: Option<&str>) -> String {
    match original {
        Some(block) => format!("{reference}\n\n{block}"),
        None => reference,
    }
}
