//! Configuration management for mdfig.
//!
//! Parses `mdfig.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `docs.source_dir`, `docs.site_dir`
//! - `diagrams.css_file`, `diagrams.puppeteer_config`, `diagrams.mermaid_config`
//! - `renderer.command` (every entry)
//! - `cache.dir`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override docs source directory.
    pub source_dir: Option<PathBuf>,
    /// Override output site directory.
    pub site_dir: Option<PathBuf>,
    /// Override cache enabled flag.
    pub cache_enabled: Option<bool>,
    /// Override fail-on-render-error policy.
    pub error_on_fail: Option<bool>,
    /// Override output image format.
    pub image_format: Option<String>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "mdfig.toml";

/// Themes understood by the diagram renderer.
pub const THEMES: &[&str] = &["default", "dark", "forest", "neutral", "base"];

/// Supported output image formats.
pub const IMAGE_FORMATS: &[&str] = &["png", "svg"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Application configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Documentation configuration (paths are relative strings from TOML).
    docs: DocsConfigRaw,
    /// Diagram configuration as written in the file.
    diagrams: DiagramsConfigRaw,
    /// External renderer configuration.
    pub renderer: RendererConfig,
    /// Cache configuration as written in the file.
    cache: CacheConfigRaw,

    /// Resolved docs configuration (set after loading).
    #[serde(skip)]
    pub docs_resolved: DocsConfig,
    /// Resolved diagrams configuration (set after loading).
    #[serde(skip)]
    pub diagrams_resolved: DiagramsConfig,
    /// Resolved cache configuration (set after loading).
    #[serde(skip)]
    pub cache_resolved: CacheConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Raw docs configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DocsConfigRaw {
    source_dir: Option<String>,
    site_dir: Option<String>,
}

/// Resolved documentation configuration with absolute paths.
#[derive(Debug, Default)]
pub struct DocsConfig {
    /// Directory pages are discovered in.
    pub source_dir: PathBuf,
    /// Directory rewritten pages and images are written to.
    pub site_dir: PathBuf,
}

/// Raw diagrams configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DiagramsConfigRaw {
    enabled: Option<bool>,
    enabled_if_env: Option<String>,
    languages: Option<Vec<String>>,
    output_dir: Option<String>,
    image_format: Option<String>,
    theme: Option<String>,
    background_color: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f64>,
    css_file: Option<String>,
    puppeteer_config: Option<String>,
    mermaid_config: Option<String>,
    timeout_secs: Option<u64>,
    preserve_original: Option<bool>,
    error_on_fail: Option<bool>,
    log_level: Option<String>,
}

/// Resolved diagram configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramsConfig {
    /// Master switch for diagram processing.
    pub enabled: bool,
    /// Only process when this environment variable is set and non-empty.
    pub enabled_if_env: Option<String>,
    /// Fence language identifiers recognized as diagrams.
    pub languages: Vec<String>,
    /// Image directory relative to the site root; also the link prefix.
    pub output_dir: String,
    /// Output image format (`png` or `svg`).
    pub image_format: String,
    /// Renderer theme.
    pub theme: String,
    /// Image background color.
    pub background_color: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Rendering scale factor.
    pub scale: f64,
    /// Stylesheet passed to the renderer.
    pub css_file: Option<PathBuf>,
    /// Browser configuration passed to the renderer.
    pub puppeteer_config: Option<PathBuf>,
    /// Diagram tool configuration passed to the renderer.
    pub mermaid_config: Option<PathBuf>,
    /// Maximum wall-clock seconds per render.
    pub timeout_secs: u64,
    /// Keep the original fenced block after the image reference.
    pub preserve_original: bool,
    /// Abort the page on the first render failure.
    pub error_on_fail: bool,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for DiagramsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enabled_if_env: None,
            languages: vec!["mermaid".to_owned()],
            output_dir: "assets/images".to_owned(),
            image_format: "png".to_owned(),
            theme: "default".to_owned(),
            background_color: "white".to_owned(),
            width: 800,
            height: 600,
            scale: 1.0,
            css_file: None,
            puppeteer_config: None,
            mermaid_config: None,
            timeout_secs: 30,
            preserve_original: false,
            error_on_fail: false,
            log_level: "warn".to_owned(),
        }
    }
}

impl DiagramsConfig {
    /// Whether diagram processing should run in the current environment.
    ///
    /// False when `enabled` is off, or when `enabled_if_env` names a variable
    /// that is unset or empty.
    #[must_use]
    pub fn is_active(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.enabled_if_env {
            Some(var) => std::env::var(var).is_ok_and(|v| !v.is_empty()),
            None => true,
        }
    }
}

/// External renderer configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Program followed by leading arguments.
    pub command: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: vec!["mmdc".to_owned()],
        }
    }
}

/// Raw cache configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CacheConfigRaw {
    enabled: Option<bool>,
    dir: Option<String>,
}

/// Resolved cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfig {
    /// Whether rendered images are kept between builds.
    pub enabled: bool,
    /// Cache root directory.
    pub dir: PathBuf,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`renderer.command`").
        field: String,
        /// Error message (e.g., "${`MMDC_BIN`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a string field to be one of `allowed`.
fn require_one_of(value: &str, allowed: &[&str], field: &str) -> Result<(), ConfigError> {
    if !allowed.contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{field} must be one of {}, got '{value}'",
            allowed.join(", ")
        )));
    }
    Ok(())
}

/// Require an optional path field to point at an existing file.
fn require_existing_file(path: Option<&Path>, field: &str) -> Result<(), ConfigError> {
    if let Some(path) = path
        && !path.is_file()
    {
        return Err(ConfigError::Validation(format!(
            "{field} not found: {}",
            path.display()
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `mdfig.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values. The merged result
    /// is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(source_dir) = &settings.source_dir {
            self.docs_resolved.source_dir.clone_from(source_dir);
        }
        if let Some(site_dir) = &settings.site_dir {
            self.docs_resolved.site_dir.clone_from(site_dir);
        }
        if let Some(cache_enabled) = settings.cache_enabled {
            self.cache_resolved.enabled = cache_enabled;
        }
        if let Some(error_on_fail) = settings.error_on_fail {
            self.diagrams_resolved.error_on_fail = error_on_fail;
        }
        if let Some(format) = &settings.image_format {
            self.diagrams_resolved.image_format.clone_from(format);
        }
    }

    /// Directory images are published into (`site_dir/output_dir`).
    #[must_use]
    pub fn image_output_dir(&self) -> PathBuf {
        self.docs_resolved
            .site_dir
            .join(&self.diagrams_resolved.output_dir)
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            docs_resolved: DocsConfig {
                source_dir: base.join("docs"),
                site_dir: base.join("site"),
            },
            cache_resolved: CacheConfig {
                enabled: true,
                dir: base.join(".mdfig/cache"),
            },
            ..Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Invalid values are fatal: nothing is rendered with a configuration
    /// that fails here.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_diagrams()?;
        self.validate_renderer()?;
        Ok(())
    }

    /// Validate diagrams configuration.
    fn validate_diagrams(&self) -> Result<(), ConfigError> {
        let diagrams = &self.diagrams_resolved;

        if diagrams.languages.is_empty() {
            return Err(ConfigError::Validation(
                "diagrams.languages cannot be empty".to_owned(),
            ));
        }
        for language in &diagrams.languages {
            require_non_empty(language, "diagrams.languages entry")?;
        }
        require_non_empty(&diagrams.output_dir, "diagrams.output_dir")?;
        require_one_of(&diagrams.image_format, IMAGE_FORMATS, "diagrams.image_format")?;
        require_one_of(&diagrams.theme, THEMES, "diagrams.theme")?;
        require_one_of(&diagrams.log_level, LOG_LEVELS, "diagrams.log_level")?;

        if diagrams.width == 0 {
            return Err(ConfigError::Validation(
                "diagrams.width must be greater than 0".to_owned(),
            ));
        }
        if diagrams.height == 0 {
            return Err(ConfigError::Validation(
                "diagrams.height must be greater than 0".to_owned(),
            ));
        }
        if !(diagrams.scale.is_finite() && diagrams.scale > 0.0) {
            return Err(ConfigError::Validation(
                "diagrams.scale must be greater than 0".to_owned(),
            ));
        }
        if diagrams.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "diagrams.timeout_secs must be greater than 0".to_owned(),
            ));
        }

        require_existing_file(diagrams.css_file.as_deref(), "diagrams.css_file")?;
        require_existing_file(
            diagrams.puppeteer_config.as_deref(),
            "diagrams.puppeteer_config",
        )?;
        require_existing_file(diagrams.mermaid_config.as_deref(), "diagrams.mermaid_config")?;

        Ok(())
    }

    /// Validate renderer configuration.
    fn validate_renderer(&self) -> Result<(), ConfigError> {
        let program = self.renderer.command.first().ok_or_else(|| {
            ConfigError::Validation("renderer.command cannot be empty".to_owned())
        })?;
        require_non_empty(program, "renderer.command[0]")
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        let expand_opt = |value: &mut Option<String>, field: &str| -> Result<(), ConfigError> {
            if let Some(v) = value {
                *v = expand::expand_env(v, field)?;
            }
            Ok(())
        };

        expand_opt(&mut self.docs.source_dir, "docs.source_dir")?;
        expand_opt(&mut self.docs.site_dir, "docs.site_dir")?;
        expand_opt(&mut self.diagrams.css_file, "diagrams.css_file")?;
        expand_opt(&mut self.diagrams.puppeteer_config, "diagrams.puppeteer_config")?;
        expand_opt(&mut self.diagrams.mermaid_config, "diagrams.mermaid_config")?;
        expand_opt(&mut self.cache.dir, "cache.dir")?;

        for arg in &mut self.renderer.command {
            *arg = expand::expand_env(arg, "renderer.command")?;
        }

        Ok(())
    }

    /// Resolve relative paths to absolute paths based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));
        let resolve_opt = |path: Option<&String>| path.map(|p| config_dir.join(p));

        self.docs_resolved = DocsConfig {
            source_dir: resolve(self.docs.source_dir.as_deref(), "docs"),
            site_dir: resolve(self.docs.site_dir.as_deref(), "site"),
        };

        self.cache_resolved = CacheConfig {
            enabled: self.cache.enabled.unwrap_or(true),
            dir: resolve(self.cache.dir.as_deref(), ".mdfig/cache"),
        };

        let raw = &self.diagrams;
        let defaults = DiagramsConfig::default();
        self.diagrams_resolved = DiagramsConfig {
            enabled: raw.enabled.unwrap_or(defaults.enabled),
            enabled_if_env: raw.enabled_if_env.clone().filter(|v| !v.is_empty()),
            languages: raw.languages.clone().unwrap_or(defaults.languages),
            output_dir: raw
                .output_dir
                .as_deref()
                .map_or(defaults.output_dir, |d| d.trim_matches('/').to_owned()),
            image_format: raw.image_format.clone().unwrap_or(defaults.image_format),
            theme: raw.theme.clone().unwrap_or(defaults.theme),
            background_color: raw
                .background_color
                .clone()
                .unwrap_or(defaults.background_color),
            width: raw.width.unwrap_or(defaults.width),
            height: raw.height.unwrap_or(defaults.height),
            scale: raw.scale.unwrap_or(defaults.scale),
            css_file: resolve_opt(raw.css_file.as_ref()),
            puppeteer_config: resolve_opt(raw.puppeteer_config.as_ref()),
            mermaid_config: resolve_opt(raw.mermaid_config.as_ref()),
            timeout_secs: raw.timeout_secs.unwrap_or(defaults.timeout_secs),
            preserve_original: raw.preserve_original.unwrap_or(defaults.preserve_original),
            error_on_fail: raw.error_on_fail.unwrap_or(defaults.error_on_fail),
            log_level: raw.log_level.clone().unwrap_or(defaults.log_level),
        };
    }
}
