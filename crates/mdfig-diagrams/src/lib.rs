//! Mermaid diagram rendering for markdown pages.
//!
//! This crate turns fenced diagram blocks in markdown into image references:
//! - `BlockExtractor` finds diagram blocks and their directive annotations
//! - `Fingerprint` identifies a render by its source and options
//! - `MermaidCli` renders through the external `mmdc` command
//! - `PagePipeline` ties it together with caching and page rewriting
//!
//! # Architecture
//!
//! The crate is organized into modules:
//! - [`extract`]: Fence scanning (`BlockExtractor`, `DiagramBlock`)
//! - [`directive`]: Inline `{key: value}` annotation parsing
//! - [`options`]: Render options and directive resolution
//! - [`fingerprint`]: Content-addressed render identity
//! - [`invoke`]: External renderer process management
//! - [`rewrite`]: Span-based text replacement
//! - [`pipeline`]: Per-page orchestration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mdfig_diagrams::{MermaidCli, PagePipeline, PipelineSettings};
//!
//! let renderer = MermaidCli::new(vec!["mmdc".to_owned()])?;
//! let pipeline = PagePipeline::new(PipelineSettings::default(), Arc::new(renderer))?;
//!
//! let page = "# Flow\n\n```mermaid\ngraph TD\nA --> B\n```\n";
//! let result = pipeline.process("index.md", page)?;
//! assert_eq!(result.image_paths.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod consts;
pub mod directive;
mod error;
pub mod extract;
pub mod fingerprint;
mod hooks;
pub mod invoke;
mod markup;
pub mod options;
pub mod pipeline;
pub mod rewrite;

pub use consts::{DEFAULT_TIMEOUT, THEMES};
pub use directive::{DirectiveError, parse_annotation};
pub use error::{ConfigurationError, PageError};
pub use extract::{BlockExtractor, DiagramBlock};
pub use fingerprint::Fingerprint;
pub use hooks::{DefaultHooks, Document, PageHooks};
pub use invoke::{MermaidCli, RenderFailure, RenderResult, Renderer};
pub use markup::{ImageMarkup, MarkdownImage, relative_link, replacement_text};
pub use options::{ImageFormat, RenderOptions};
pub use pipeline::{Diagnostic, PagePipeline, PageResult, PageStats, PipelineSettings};
pub use rewrite::Replacements;
