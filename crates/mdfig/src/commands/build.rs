//! `mdfig build` command implementation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Args;
use ignore::WalkBuilder;
use mdfig_cache::write_atomic;
use mdfig_config::{CliSettings, Config};
use mdfig_diagrams::{
    Document, ImageFormat, MermaidCli, PageHooks, PagePipeline, PageResult, PageStats,
    PipelineSettings, RenderFailure, RenderOptions, RenderResult, Renderer,
};
use rayon::prelude::*;

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the build command.
#[derive(Args)]
pub(crate) struct BuildArgs {
    /// Path to configuration file (default: auto-discover mdfig.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Markdown source directory (overrides config).
    #[arg(short, long)]
    source_dir: Option<PathBuf>,

    /// Output directory for the rewritten site (overrides config).
    #[arg(long)]
    site_dir: Option<PathBuf>,

    /// Image format: png or svg (overrides config).
    #[arg(short, long)]
    format: Option<String>,

    /// Fail the build on the first diagram that cannot be rendered.
    #[arg(long)]
    strict: bool,

    /// Disable caching.
    #[arg(long)]
    no_cache: bool,
}

impl BuildArgs {
    /// Execute the build command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid, a file cannot be read or
    /// written, or (with `--strict`) a diagram fails to render.
    pub(crate) fn execute(self, verbose: bool) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            source_dir: self.source_dir,
            site_dir: self.site_dir,
            cache_enabled: self.no_cache.then_some(false),
            error_on_fail: self.strict.then_some(true),
            image_format: self.format,
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        crate::init_tracing(verbose, &config.diagrams_resolved.log_level);

        let source_dir = &config.docs_resolved.source_dir;
        let site_dir = &config.docs_resolved.site_dir;
        if !source_dir.is_dir() {
            return Err(CliError::Validation(format!(
                "Source directory not found: {}",
                source_dir.display()
            )));
        }

        output.highlight("Building site");
        output.info(&format!("Source: {}", source_dir.display()));
        output.info(&format!("Output: {}", site_dir.display()));

        let hooks = Arc::new(BuildHooks::new(config.diagrams_resolved.is_active()));
        if !hooks.active {
            output.warning("Diagram processing disabled, pages are copied unchanged");
        }

        // Only an active build needs the renderer installed
        let renderer: Arc<dyn Renderer> = if hooks.active {
            Arc::new(
                MermaidCli::new(config.renderer.command.clone())?
                    .timeout(Duration::from_secs(config.diagrams_resolved.timeout_secs)),
            )
        } else {
            Arc::new(DisabledRenderer)
        };
        let pipeline = PagePipeline::new(pipeline_settings(&config)?, renderer)?
            .with_hooks(Arc::clone(&hooks) as Arc<dyn PageHooks>);

        let report = build_site(source_dir, site_dir, &pipeline)?;

        let cache_dir = &config.cache_resolved.dir;
        if !config.cache_resolved.enabled && cache_dir.exists() {
            fs::remove_dir_all(cache_dir)?;
            tracing::info!(cache_dir = %cache_dir.display(), "removed cache directory");
        }

        let stats = hooks.stats();
        output.success(&format!(
            "Built {} pages ({} other files) to {}",
            report.pages,
            report.assets,
            site_dir.display()
        ));
        output.info(&format!(
            "Diagrams: {} rendered, {} from cache, {} failed",
            stats.rendered, stats.cache_hits, stats.failed
        ));
        let diagnostics = hooks.diagnostics();
        if diagnostics > 0 {
            output.warning(&format!(
                "{diagnostics} diagram warnings (see log output for details)"
            ));
        }
        Ok(())
    }
}

/// Translate loaded configuration into pipeline settings.
fn pipeline_settings(config: &Config) -> Result<PipelineSettings, CliError> {
    let diagrams = &config.diagrams_resolved;
    let format = ImageFormat::parse(&diagrams.image_format).ok_or_else(|| {
        CliError::Validation(format!(
            "unsupported image format '{}'",
            diagrams.image_format
        ))
    })?;

    Ok(PipelineSettings {
        defaults: RenderOptions {
            format,
            theme: diagrams.theme.clone(),
            background_color: diagrams.background_color.clone(),
            width: diagrams.width,
            height: diagrams.height,
            scale: diagrams.scale,
            css_file: diagrams.css_file.clone(),
            puppeteer_config: diagrams.puppeteer_config.clone(),
            mermaid_config: diagrams.mermaid_config.clone(),
        },
        languages: diagrams.languages.clone(),
        output_dir: config.image_output_dir(),
        link_dir: diagrams.output_dir.clone(),
        cache_enabled: config.cache_resolved.enabled,
        cache_dir: config.cache_resolved.dir.clone(),
        preserve_original: diagrams.preserve_original,
        fail_on_render_error: diagrams.error_on_fail,
    })
}

/// Gates diagram processing and collects build statistics.
struct BuildHooks {
    active: bool,
    stats: Mutex<PageStats>,
    diagnostics: AtomicUsize,
}

impl BuildHooks {
    fn new(active: bool) -> Self {
        Self {
            active,
            stats: Mutex::new(PageStats::default()),
            diagnostics: AtomicUsize::new(0),
        }
    }

    fn stats(&self) -> PageStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn diagnostics(&self) -> usize {
        self.diagnostics.load(Ordering::Relaxed)
    }
}

impl PageHooks for BuildHooks {
    fn should_process(&self, _document: &Document<'_>) -> bool {
        self.active
    }

    fn on_page_rendered(&self, document: &Document<'_>, result: &PageResult) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) += result.stats;
        self.diagnostics
            .fetch_add(result.diagnostics.len(), Ordering::Relaxed);
        if result.stats.blocks > 0 {
            tracing::debug!(
                document = document.id,
                images = result.image_paths.len(),
                "page processed"
            );
        }
    }
}

/// Stands in for the renderer when diagram processing is switched off.
///
/// `BuildHooks` skips every page in that case, so this is never called.
struct DisabledRenderer;

impl Renderer for DisabledRenderer {
    fn render(&self, _code: &str, _options: &RenderOptions, _destination: &Path) -> RenderResult {
        Err(RenderFailure::Io(io::Error::other(
            "diagram processing is disabled",
        )))
    }
}

/// File counts of a finished build.
#[derive(Debug, Default, PartialEq, Eq)]
struct BuildReport {
    pages: usize,
    assets: usize,
}

/// Process every file under `source_dir` into `site_dir`.
///
/// Markdown pages go through `pipeline` in parallel; other files are copied.
fn build_site(
    source_dir: &Path,
    site_dir: &Path,
    pipeline: &PagePipeline,
) -> Result<BuildReport, CliError> {
    let files = discover_files(source_dir, site_dir)?;
    tracing::info!(files = files.len(), "discovered source files");

    let pages: Vec<bool> = files
        .par_iter()
        .map(|rel| build_file(source_dir, site_dir, rel, pipeline))
        .collect::<Result<_, _>>()?;

    let page_count = pages.iter().filter(|is_page| **is_page).count();
    Ok(BuildReport {
        pages: page_count,
        assets: pages.len() - page_count,
    })
}

/// Build one file. Returns whether it was a markdown page.
fn build_file(
    source_dir: &Path,
    site_dir: &Path,
    rel: &Path,
    pipeline: &PagePipeline,
) -> Result<bool, CliError> {
    let source = source_dir.join(rel);
    let target = site_dir.join(rel);

    if !is_markdown(rel) {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &target)?;
        return Ok(false);
    }

    let text = fs::read_to_string(&source)?;
    let result = pipeline.process(&document_id(rel), &text)?;
    write_atomic(&target, result.text.as_bytes())?;
    Ok(true)
}

/// Relative paths of all files under `source_dir`, sorted.
///
/// Honors ignore files and skips hidden entries. `site_dir` is skipped when
/// it lives inside `source_dir`.
fn discover_files(source_dir: &Path, site_dir: &Path) -> Result<Vec<PathBuf>, CliError> {
    let source_dir = source_dir
        .canonicalize()
        .unwrap_or_else(|_| source_dir.to_path_buf());
    let site_dir = site_dir
        .canonicalize()
        .unwrap_or_else(|_| site_dir.to_path_buf());

    let walker = WalkBuilder::new(&source_dir)
        .require_git(false)
        .filter_entry(move |entry| entry.path() != site_dir)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(&source_dir) {
            files.push(rel.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

/// Logical page id: relative path with `/` separators.
fn document_id(rel: &Path) -> String {
    rel.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
