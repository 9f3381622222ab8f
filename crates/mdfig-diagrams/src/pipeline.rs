//! Per-page diagram processing.
//!
//! [`PagePipeline`] drives one document through the whole flow:
//!
//! 1. Extract diagram blocks ([`BlockExtractor`])
//! 2. For each block, in source order:
//!    - resolve render options from defaults and block directives
//!    - compute the [`Fingerprint`]
//!    - look the image up in the store, render on a miss, store the result
//!    - publish the image to the output directory
//! 3. Replace every completed block with image markup ([`Replacements`])
//!
//! Work on one fingerprint is serialized through [`RenderLocks`], so pages
//! processed in parallel render a shared diagram once and the others find it
//! in the cache.
//!
//! # Failure policy
//!
//! A block whose render fails is left untouched and recorded as a
//! [`Diagnostic`]. With `fail_on_render_error` set, the first failure aborts
//! the page with [`PageError`] instead and remaining blocks are not rendered.

use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdfig_cache::{FileImageCache, ImageStore, OutputStore, RenderLocks, copy_atomic, write_atomic};

use crate::consts::DEFAULT_LANGUAGE;
use crate::error::{ConfigurationError, PageError};
use crate::extract::{BlockExtractor, DiagramBlock};
use crate::fingerprint::Fingerprint;
use crate::hooks::{DefaultHooks, Document, PageHooks};
use crate::invoke::{RenderFailure, Renderer};
use crate::markup::{ImageMarkup, MarkdownImage, relative_link, replacement_text};
use crate::options::RenderOptions;
use crate::rewrite::Replacements;

/// Settings shared by every page of a build.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Render options before per-block directives are applied.
    pub defaults: RenderOptions,
    /// Fence languages treated as diagrams.
    pub languages: Vec<String>,
    /// Directory images are published into.
    pub output_dir: PathBuf,
    /// Image directory relative to the site root, used to build links.
    pub link_dir: String,
    /// Keep rendered images between runs.
    pub cache_enabled: bool,
    /// Cache root when caching is enabled.
    pub cache_dir: PathBuf,
    /// Keep the original block after the image reference.
    pub preserve_original: bool,
    /// Abort the page on the first render failure.
    pub fail_on_render_error: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            defaults: RenderOptions::default(),
            languages: vec![DEFAULT_LANGUAGE.to_owned()],
            output_dir: PathBuf::from("site/assets/images"),
            link_dir: "assets/images".to_owned(),
            cache_enabled: true,
            cache_dir: PathBuf::from(".mdfig/cache"),
            preserve_original: false,
            fail_on_render_error: false,
        }
    }
}

/// Block counts for one page (or, summed, for a build).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    /// Diagram blocks found.
    pub blocks: usize,
    /// Blocks served from the cache.
    pub cache_hits: usize,
    /// Blocks rendered by the external renderer.
    pub rendered: usize,
    /// Blocks left unrendered because of a failure.
    pub failed: usize,
}

impl AddAssign for PageStats {
    fn add_assign(&mut self, other: Self) {
        self.blocks += other.blocks;
        self.cache_hits += other.cache_hits;
        self.rendered += other.rendered;
        self.failed += other.failed;
    }
}

/// Problem with one block that did not stop the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Zero-based block index within the page.
    pub index: usize,
    /// Human-readable description.
    pub message: String,
}

/// Output of processing one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    /// Page text with rendered blocks replaced.
    pub text: String,
    /// Published images referenced by the page, in block order.
    pub image_paths: Vec<PathBuf>,
    /// Block counts.
    pub stats: PageStats,
    /// Per-block problems, in block order.
    pub diagnostics: Vec<Diagnostic>,
}

impl PageResult {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            image_paths: Vec::new(),
            stats: PageStats::default(),
            diagnostics: Vec::new(),
        }
    }

    fn diagnose(&mut self, block: &DiagramBlock, message: String) {
        tracing::warn!(
            document = %block.document_id,
            index = block.index,
            "{message}"
        );
        self.diagnostics.push(Diagnostic {
            index: block.index,
            message,
        });
    }
}

/// Why a block could not be completed.
enum BlockFailure {
    Render(RenderFailure),
    Output { path: PathBuf, source: io::Error },
}

/// Turns pages with diagram blocks into pages with image references.
///
/// One pipeline serves a whole build and may be shared across threads.
pub struct PagePipeline {
    settings: PipelineSettings,
    extractor: BlockExtractor,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn ImageStore>,
    locks: RenderLocks,
    hooks: Arc<dyn PageHooks>,
    markup: Arc<dyn ImageMarkup>,
}

impl PagePipeline {
    /// Create a pipeline, validating `settings` before anything is rendered.
    ///
    /// With caching enabled the cache directory is opened here. If that
    /// fails the pipeline logs a warning and runs uncached.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for invalid default options or an
    /// empty language list.
    pub fn new(
        settings: PipelineSettings,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self, ConfigurationError> {
        settings.defaults.validate()?;
        if settings.languages.is_empty() || settings.languages.iter().any(String::is_empty) {
            return Err(ConfigurationError::NoLanguages);
        }

        let store = open_store(&settings);
        Ok(Self {
            extractor: BlockExtractor::new(settings.languages.iter().cloned()),
            settings,
            renderer,
            store,
            locks: RenderLocks::new(),
            hooks: Arc::new(DefaultHooks),
            markup: Arc::new(MarkdownImage::default()),
        })
    }

    /// Set host hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn PageHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the image markup generator.
    ///
    /// Default is [`MarkdownImage`].
    #[must_use]
    pub fn with_markup(mut self, markup: Arc<dyn ImageMarkup>) -> Self {
        self.markup = markup;
        self
    }

    /// Store images are looked up in and written to.
    #[must_use]
    pub fn store(&self) -> &dyn ImageStore {
        self.store.as_ref()
    }

    /// Settings this pipeline was built with.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one page.
    ///
    /// A page without diagram blocks is returned byte-identical.
    ///
    /// # Errors
    ///
    /// Only in strict mode: returns [`PageError`] for the first block that
    /// could not be rendered or published.
    pub fn process(&self, document_id: &str, text: &str) -> Result<PageResult, PageError> {
        let document = Document {
            id: document_id,
            text,
        };
        if !self.hooks.should_process(&document) {
            tracing::debug!(document = document_id, "page skipped");
            return Ok(PageResult::unchanged(text));
        }

        let blocks = self.extractor.extract(document_id, text);
        let mut result = PageResult::unchanged(text);
        result.stats.blocks = blocks.len();
        let mut replacements = Replacements::with_capacity(blocks.len());

        for block in &blocks {
            if let Some(replacement) = self.process_block(text, block, &mut result)? {
                replacements.add(block.span(), replacement);
            }
        }
        result.text = replacements.apply(text);

        if result.stats.rendered > 0 {
            tracing::info!(
                document = document_id,
                cache_hits = result.stats.cache_hits,
                "Generated {} diagrams for page",
                result.stats.rendered
            );
        }
        self.hooks.on_page_rendered(&document, &result);
        Ok(result)
    }

    /// Produce the replacement for one block, or `None` to leave it as is.
    fn process_block(
        &self,
        text: &str,
        block: &DiagramBlock,
        result: &mut PageResult,
    ) -> Result<Option<String>, PageError> {
        for anomaly in &block.anomalies {
            result.diagnose(block, format!("malformed directive annotation: {anomaly}"));
        }
        let (options, warnings) = self.settings.defaults.resolve(&block.directives);
        for warning in warnings {
            result.diagnose(block, warning);
        }

        let source = block.source();
        if source.is_empty() {
            result.diagnose(block, "empty diagram left unchanged".to_owned());
            return Ok(None);
        }

        let fingerprint = Fingerprint::compute(source, &options, options.format);
        let file_name = fingerprint.file_name(options.format);
        let published = self.settings.output_dir.join(&file_name);

        let outcome = self.locks.with_lock(fingerprint.as_str(), || {
            self.obtain_image(source, &options, &fingerprint, &published)
        });

        match outcome {
            Ok(cache_hit) => {
                if cache_hit {
                    result.stats.cache_hits += 1;
                } else {
                    result.stats.rendered += 1;
                }
                result.image_paths.push(published);

                let link = relative_link(&block.document_id, &self.settings.link_dir, &file_name);
                let original = self
                    .settings
                    .preserve_original
                    .then(|| &text[block.span()]);
                Ok(Some(replacement_text(
                    self.markup.image_reference(&link),
                    original,
                )))
            }
            Err(failure) => {
                result.stats.failed += 1;
                let error = match failure {
                    BlockFailure::Render(failure) => PageError::Render {
                        document: block.document_id.clone(),
                        index: block.index,
                        failure,
                    },
                    BlockFailure::Output { path, source } => PageError::Output {
                        document: block.document_id.clone(),
                        path,
                        source,
                    },
                };
                if self.settings.fail_on_render_error {
                    tracing::error!(error = %error, "aborting page");
                    return Err(error);
                }
                result.diagnose(block, format!("left unrendered: {error}"));
                Ok(None)
            }
        }
    }

    /// Make the image for `fingerprint` available at `published`.
    ///
    /// Returns whether it came from the cache.
    fn obtain_image(
        &self,
        source: &str,
        options: &RenderOptions,
        fingerprint: &Fingerprint,
        published: &Path,
    ) -> Result<bool, BlockFailure> {
        if let Some(cached) = self.store.lookup(fingerprint.as_str()) {
            tracing::debug!(fingerprint = %fingerprint, "cache hit");
            publish(&cached, published)?;
            return Ok(true);
        }

        tracing::debug!(fingerprint = %fingerprint, "cache miss, rendering");
        let scratch = tempfile::TempDir::new()
            .map_err(|e| BlockFailure::Render(RenderFailure::Io(e)))?;
        let destination = scratch.path().join(fingerprint.file_name(options.format));
        let image = self
            .renderer
            .render(source, options, &destination)
            .map_err(BlockFailure::Render)?;

        match self
            .store
            .put(fingerprint.as_str(), &image, options.format.extension())
        {
            Ok(stored) => publish(&stored, published)?,
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "failed to store image in cache, writing to output directory only"
                );
                write_atomic(published, &image).map_err(|source| BlockFailure::Output {
                    path: published.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(false)
    }
}

/// Copy a stored image to its published location.
fn publish(stored: &Path, published: &Path) -> Result<(), BlockFailure> {
    if stored == published {
        return Ok(());
    }
    copy_atomic(stored, published).map_err(|source| BlockFailure::Output {
        path: published.to_path_buf(),
        source,
    })
}

/// Open the image store for `settings`, falling back to uncached output.
fn open_store(settings: &PipelineSettings) -> Arc<dyn ImageStore> {
    if settings.cache_enabled {
        match FileImageCache::open(settings.cache_dir.clone()) {
            Ok(cache) => return Arc::new(cache),
            Err(e) => tracing::warn!(
                cache_dir = %settings.cache_dir.display(),
                error = %e,
                "cache directory unavailable, rendering without cache"
            ),
        }
    }
    Arc::new(OutputStore::new(settings.output_dir.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PAGE: &str = "# Flow\n\n```mermaid\ngraph TD\nA --> B\n```\n\nDone.\n";

    /// Renderer that writes `theme|format|code` and counts invocations.
    ///
    /// Diagrams containing `FAIL` time out.
    #[derive(Default)]
    struct FakeRenderer {
        calls: AtomicUsize,
    }

    impl FakeRenderer {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Renderer for FakeRenderer {
        fn render(&self, code: &str, options: &RenderOptions, destination: &Path) -> crate::RenderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if code.contains("FAIL") {
                return Err(RenderFailure::Timeout {
                    timeout: Duration::from_secs(1),
                });
            }
            let image = format!("{}|{}|{code}", options.theme, options.format.as_str()).into_bytes();
            fs::write(destination, &image)?;
            Ok(image)
        }
    }

    fn settings(root: &Path) -> PipelineSettings {
        PipelineSettings {
            output_dir: root.join("site/assets/images"),
            cache_dir: root.join("cache"),
            ..PipelineSettings::default()
        }
    }

    fn pipeline(settings: PipelineSettings) -> (PagePipeline, Arc<FakeRenderer>) {
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = PagePipeline::new(settings, Arc::clone(&renderer) as Arc<dyn Renderer>).unwrap();
        (pipeline, renderer)
    }

    fn fingerprint_of(code: &str, options: &RenderOptions) -> Fingerprint {
        Fingerprint::compute(code, options, options.format)
    }

    #[test]
    fn test_page_without_diagrams_is_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "# Title\r\n\r\n```rust\nfn main() {}\n```\n\nTrailing spaces   \n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(result.text, text);
        assert!(result.image_paths.is_empty());
        assert_eq!(result.stats, PageStats::default());
        assert_eq!(renderer.calls(), 0);
    }

    #[test]
    fn test_single_diagram_rendered() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let fp = fingerprint_of("graph TD\nA --> B", &RenderOptions::default());

        let result = pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert_eq!(
            result.text,
            format!("# Flow\n\n![Mermaid Diagram](assets/images/{fp}.png)\n\nDone.\n")
        );
        assert!(!result.text.contains("graph TD"));
        let published = tmp.path().join(format!("site/assets/images/{fp}.png"));
        assert_eq!(result.image_paths, vec![published.clone()]);
        assert_eq!(fs::read(published).unwrap(), b"default|png|graph TD\nA --> B");
        assert_eq!(pipeline.store().entries().unwrap().len(), 1);
        assert_eq!(
            result.stats,
            PageStats {
                blocks: 1,
                cache_hits: 0,
                rendered: 1,
                failed: 0,
            }
        );
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_warm_cache_skips_renderer() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));

        let first = pipeline.process("index.md", PAGE).unwrap();
        let second = pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert_eq!(first.text, second.text);
        assert_eq!(first.image_paths, second.image_paths);
        assert_eq!(second.stats.cache_hits, 1);
        assert_eq!(second.stats.rendered, 0);
    }

    #[test]
    fn test_cache_survives_new_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let (first, first_renderer) = pipeline(settings(tmp.path()));
        first.process("index.md", PAGE).unwrap();
        fs::remove_dir_all(tmp.path().join("site")).unwrap();

        let (second, second_renderer) = pipeline(settings(tmp.path()));
        let result = second.process("index.md", PAGE).unwrap();

        assert_eq!(first_renderer.calls(), 1);
        assert_eq!(second_renderer.calls(), 0);
        // Cache hit is republished into the (cleaned) output directory
        assert!(result.image_paths[0].exists());
    }

    #[test]
    fn test_same_diagram_twice_in_page_renders_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "```mermaid\nA --> B\n```\n\n```mermaid\nA --> B\n```\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert_eq!(result.stats.rendered, 1);
        assert_eq!(result.stats.cache_hits, 1);
        assert_eq!(result.image_paths[0], result.image_paths[1]);
    }

    #[test]
    fn test_different_themes_render_separately() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "```mermaid {theme: dark}\nA --> B\n```\n\n```mermaid {theme: forest}\nA --> B\n```\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 2);
        assert_ne!(result.image_paths[0], result.image_paths[1]);
        assert_eq!(pipeline.store().entries().unwrap().len(), 2);
        assert_eq!(
            fs::read(&result.image_paths[0]).unwrap(),
            b"dark|png|A --> B"
        );
    }

    #[test]
    fn test_format_directive_changes_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(settings(tmp.path()));

        let result = pipeline
            .process("index.md", "```mermaid {format: svg}\nA\n```\n")
            .unwrap();

        assert_eq!(
            result.image_paths[0].extension().and_then(|e| e.to_str()),
            Some("svg")
        );
        assert!(result.text.contains(".svg)"));
    }

    #[test]
    fn test_render_failure_lenient_keeps_block() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "before\n```mermaid\nFAIL\n```\nafter\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert_eq!(result.text, text);
        assert!(result.image_paths.is_empty());
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].index, 0);
        assert!(result.diagnostics[0].message.contains("timed out"));
    }

    #[test]
    fn test_render_failure_lenient_continues_with_other_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "```mermaid\nFAIL\n```\n```mermaid\nA --> B\n```\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 2);
        assert!(result.text.starts_with("```mermaid\nFAIL\n```\n![Mermaid Diagram]("));
        assert_eq!(result.image_paths.len(), 1);
    }

    #[test]
    fn test_render_failure_strict_aborts_page() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(PipelineSettings {
            fail_on_render_error: true,
            ..settings(tmp.path())
        });
        let text = "```mermaid\nA\n```\n```mermaid\nFAIL\n```\n```mermaid\nC\n```\n";

        let err = pipeline.process("guide/page.md", text).unwrap_err();

        match err {
            PageError::Render {
                document, index, ..
            } => {
                assert_eq!(document, "guide/page.md");
                assert_eq!(index, 1);
            }
            other => panic!("Expected Render error, got {other:?}"),
        }
        // Blocks after the failure are not rendered
        assert_eq!(renderer.calls(), 2);
    }

    #[test]
    fn test_cache_disabled_always_renders() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(PipelineSettings {
            cache_enabled: false,
            ..settings(tmp.path())
        });

        let first = pipeline.process("index.md", PAGE).unwrap();
        let second = pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(renderer.calls(), 2);
        assert_eq!(first.text, second.text);
        assert!(first.image_paths[0].exists());
        assert!(!tmp.path().join("cache").exists());
        assert!(!pipeline.store().is_persistent());
    }

    #[test]
    fn test_unwritable_cache_falls_back_to_output() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cache"), b"not a directory").unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));

        let result = pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert!(!pipeline.store().is_persistent());
        assert!(result.image_paths[0].exists());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_cache_write_failure_publishes_directly() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        assert!(pipeline.store().is_persistent());
        // Cache becomes unwritable after the pipeline opened it
        fs::remove_dir_all(tmp.path().join("cache")).unwrap();
        fs::write(tmp.path().join("cache"), b"not a directory").unwrap();
        let fp = fingerprint_of("graph TD\nA --> B", &RenderOptions::default());

        let result = pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(renderer.calls(), 1);
        assert_eq!(result.stats.rendered, 1);
        assert_eq!(result.stats.failed, 0);
        assert!(result.text.contains(&format!("![Mermaid Diagram](assets/images/{fp}.png)")));
        assert!(!result.text.contains("graph TD"));
        assert_eq!(
            fs::read(&result.image_paths[0]).unwrap(),
            b"default|png|graph TD\nA --> B"
        );
    }

    #[test]
    fn test_preserve_original() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(PipelineSettings {
            preserve_original: true,
            ..settings(tmp.path())
        });
        let block = "```mermaid {theme: dark}\ngraph TD\nA --> B\n```";
        let text = format!("intro\n{block}\noutro\n");

        let result = pipeline.process("index.md", &text).unwrap();

        let link = result.text.lines().nth(1).unwrap().to_owned();
        assert!(link.starts_with("![Mermaid Diagram](assets/images/"));
        assert_eq!(result.text, format!("intro\n{link}\n\n{block}\noutro\n"));
    }

    #[test]
    fn test_nested_page_uses_relative_link() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(settings(tmp.path()));

        let result = pipeline.process("guide/setup/intro.md", PAGE).unwrap();

        assert!(result.text.contains("](../../assets/images/"), "{}", result.text);
    }

    #[test]
    fn test_directive_problems_are_diagnostics() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "```mermaid {theme: neon, size: big}\nA\n```\n```mermaid {theme: dark\nB\n```\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 2);
        assert_eq!(result.image_paths.len(), 2);
        let indexes: Vec<_> = result.diagnostics.iter().map(|d| d.index).collect();
        assert_eq!(indexes, vec![0, 0, 1]);
        // Rendered with the default theme
        assert_eq!(fs::read(&result.image_paths[0]).unwrap(), b"default|png|A");
    }

    #[test]
    fn test_empty_diagram_left_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let text = "```mermaid\n   \n```\n";

        let result = pipeline.process("index.md", text).unwrap();

        assert_eq!(renderer.calls(), 0);
        assert_eq!(result.text, text);
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer: Arc<dyn Renderer> = Arc::new(FakeRenderer::default());

        let mut bad = settings(tmp.path());
        bad.defaults.width = 0;
        assert!(matches!(
            PagePipeline::new(bad, Arc::clone(&renderer)),
            Err(ConfigurationError::NonPositive { field: "width" })
        ));

        let mut bad = settings(tmp.path());
        bad.languages.clear();
        assert!(matches!(
            PagePipeline::new(bad, renderer),
            Err(ConfigurationError::NoLanguages)
        ));
        // Nothing was created for a rejected configuration
        assert!(!tmp.path().join("cache").exists());
    }

    #[derive(Default)]
    struct RecordingHooks {
        rendered: Mutex<Vec<(String, usize)>>,
    }

    impl PageHooks for RecordingHooks {
        fn should_process(&self, document: &Document<'_>) -> bool {
            !document.id.starts_with("drafts/")
        }

        fn on_page_rendered(&self, document: &Document<'_>, result: &PageResult) {
            self.rendered
                .lock()
                .unwrap()
                .push((document.id.to_owned(), result.image_paths.len()));
        }
    }

    #[test]
    fn test_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        let hooks = Arc::new(RecordingHooks::default());
        let (pipeline, renderer) = pipeline(settings(tmp.path()));
        let pipeline = pipeline.with_hooks(Arc::clone(&hooks) as Arc<dyn PageHooks>);

        let skipped = pipeline.process("drafts/wip.md", PAGE).unwrap();
        pipeline.process("index.md", PAGE).unwrap();

        assert_eq!(skipped.text, PAGE);
        assert_eq!(renderer.calls(), 1);
        assert_eq!(
            *hooks.rendered.lock().unwrap(),
            vec![("index.md".to_owned(), 1)]
        );
    }

    struct HtmlImage;

    impl ImageMarkup for HtmlImage {
        fn image_reference(&self, link: &str) -> String {
            format!(r#"<img src="{link}" alt="diagram">"#)
        }
    }

    #[test]
    fn test_custom_markup() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(settings(tmp.path()));
        let pipeline = pipeline.with_markup(Arc::new(HtmlImage));

        let result = pipeline.process("index.md", PAGE).unwrap();

        assert!(result.text.contains(r#"<img src="assets/images/"#));
    }

    #[test]
    fn test_concurrent_pages_render_shared_diagram_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, renderer) = pipeline(settings(tmp.path()));

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let pipeline = &pipeline;
                    s.spawn(move || pipeline.process(&format!("page{i}.md"), PAGE).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(renderer.calls(), 1);
        assert!(results.iter().all(|r| r.text == results[0].text));
        let rendered: usize = results.iter().map(|r| r.stats.rendered).sum();
        assert_eq!(rendered, 1);
    }

    #[test]
    fn test_page_stats_add_assign() {
        let mut total = PageStats::default();
        total += PageStats {
            blocks: 2,
            cache_hits: 1,
            rendered: 1,
            failed: 0,
        };
        total += PageStats {
            blocks: 1,
            cache_hits: 0,
            rendered: 0,
            failed: 1,
        };
        assert_eq!(
            total,
            PageStats {
                blocks: 3,
                cache_hits: 1,
                rendered: 1,
                failed: 1,
            }
        );
    }
}
