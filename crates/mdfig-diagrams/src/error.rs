//! Error types for diagram processing.

use std::io;
use std::path::PathBuf;

use crate::invoke::RenderFailure;

/// Invalid pipeline configuration.
///
/// Returned before anything is rendered. A pipeline is never constructed
/// from settings that fail these checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// A dimension or scale that must be positive is not.
    #[error("{field} must be greater than 0")]
    NonPositive {
        /// Option name.
        field: &'static str,
    },
    /// Theme the renderer does not know.
    #[error("unknown theme '{0}'")]
    UnknownTheme(String),
    /// Referenced stylesheet or config file does not exist.
    #[error("{field} not found: {}", .path.display())]
    MissingFile {
        /// Option name.
        field: &'static str,
        /// Path that was checked.
        path: PathBuf,
    },
    /// Renderer command has no program.
    #[error("renderer command cannot be empty")]
    EmptyCommand,
    /// Renderer program is not installed or not executable.
    #[error("renderer '{program}' not found (install @mermaid-js/mermaid-cli or set renderer.command)")]
    RendererNotFound {
        /// Program as configured.
        program: String,
    },
    /// No fence languages to look for.
    #[error("at least one diagram language is required")]
    NoLanguages,
}

/// Page-level processing failure.
///
/// Only produced when a block cannot be completed and the pipeline runs in
/// strict mode. In lenient mode the same conditions become diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// The renderer failed on a block.
    #[error("{document}: diagram {index} failed to render: {failure}")]
    Render {
        /// Document identifier.
        document: String,
        /// Zero-based block index within the document.
        index: usize,
        /// What went wrong.
        #[source]
        failure: RenderFailure,
    },
    /// A rendered image could not be written to the output directory.
    #[error("{document}: failed to write image {}: {source}", .path.display())]
    Output {
        /// Document identifier.
        document: String,
        /// Destination that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}
