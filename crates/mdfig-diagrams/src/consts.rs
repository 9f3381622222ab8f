//! Shared constants for diagram rendering.

use std::time::Duration;

/// Default renderer timeout per diagram.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fence language recognized when none is configured.
pub(crate) const DEFAULT_LANGUAGE: &str = "mermaid";

/// Alt text of generated image references.
pub(crate) const IMAGE_ALT: &str = "Mermaid Diagram";

/// Name of the diagram source file handed to the renderer.
pub(crate) const INPUT_FILENAME: &str = "diagram.mmd";

/// Themes understood by the renderer.
pub const THEMES: &[&str] = &["default", "dark", "forest", "neutral", "base"];
