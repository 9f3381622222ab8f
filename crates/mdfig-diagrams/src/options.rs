//! Render options and their resolution against per-block directives.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::consts::THEMES;
use crate::error::ConfigurationError;

/// Output format for rendered diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// Raster image (default).
    #[default]
    Png,
    /// Vector image.
    Svg,
}

impl ImageFormat {
    /// Parse format from a config or directive value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "png" => Some(Self::Png),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }

    /// Return format as string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
        }
    }

    /// File extension of images in this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// Fully resolved options for one render call.
///
/// Built by merging page-level defaults with the directives of a single
/// block via [`RenderOptions::resolve`]. Fingerprints are computed from the
/// resolved value, so a directive that restates a default yields the same
/// fingerprint as no directive at all.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Output image format.
    pub format: ImageFormat,
    /// Renderer theme.
    pub theme: String,
    /// Background color (any value the renderer accepts, e.g. `white`, `transparent`).
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
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            theme: "default".to_owned(),
            background_color: "white".to_owned(),
            width: 800,
            height: 600,
            scale: 1.0,
            css_file: None,
            puppeteer_config: None,
            mermaid_config: None,
        }
    }
}

impl RenderOptions {
    /// Check that these options can be handed to a renderer.
    ///
    /// Called once on the page-level defaults before any rendering starts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.width == 0 {
            return Err(ConfigurationError::NonPositive { field: "width" });
        }
        if self.height == 0 {
            return Err(ConfigurationError::NonPositive { field: "height" });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigurationError::NonPositive { field: "scale" });
        }
        if !THEMES.contains(&self.theme.as_str()) {
            return Err(ConfigurationError::UnknownTheme(self.theme.clone()));
        }

        let files = [
            ("css_file", &self.css_file),
            ("puppeteer_config", &self.puppeteer_config),
            ("mermaid_config", &self.mermaid_config),
        ];
        for (field, path) in files {
            if let Some(path) = path
                && !path.is_file()
            {
                return Err(ConfigurationError::MissingFile {
                    field,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Merge block directives over these defaults.
    ///
    /// Directives that name an unknown key or carry an unusable value are
    /// skipped and reported as warnings; the default is kept for that field.
    #[must_use]
    pub fn resolve(&self, directives: &BTreeMap<String, String>) -> (Self, Vec<String>) {
        let mut options = self.clone();
        let mut warnings = Vec::new();

        for (key, value) in directives {
            match key.as_str() {
                "theme" => {
                    if THEMES.contains(&value.as_str()) {
                        options.theme.clone_from(value);
                    } else {
                        warnings.push(format!(
                            "unknown theme '{value}', using '{}' (valid: {})",
                            self.theme,
                            THEMES.join(", ")
                        ));
                    }
                }
                "background" => {
                    if value.is_empty() {
                        warnings.push("empty background ignored".to_owned());
                    } else {
                        options.background_color.clone_from(value);
                    }
                }
                "width" => match parse_dimension(value) {
                    Some(width) => options.width = width,
                    None => warnings.push(format!(
                        "invalid width '{value}', using {}",
                        self.width
                    )),
                },
                "height" => match parse_dimension(value) {
                    Some(height) => options.height = height,
                    None => warnings.push(format!(
                        "invalid height '{value}', using {}",
                        self.height
                    )),
                },
                "scale" => match value.parse::<f64>() {
                    Ok(scale) if scale.is_finite() && scale > 0.0 => options.scale = scale,
                    _ => warnings.push(format!(
                        "invalid scale '{value}', using {}",
                        self.scale
                    )),
                },
                "format" => match ImageFormat::parse(value) {
                    Some(format) => options.format = format,
                    None => warnings.push(format!(
                        "unknown format '{value}', using '{}' (valid: png, svg)",
                        self.format.as_str()
                    )),
                },
                _ => warnings.push(format!(
                    "unknown directive '{key}' ignored (valid: theme, background, width, height, scale, format)"
                )),
            }
        }

        (options, warnings)
    }

    /// Options as sorted `name -> value` pairs, the canonical form hashed
    /// into fingerprints.
    ///
    /// Config files are identified by path. Editing a stylesheet in place
    /// does not invalidate cached images.
    #[must_use]
    pub fn canonical_fields(&self) -> BTreeMap<&'static str, String> {
        let path_field = |path: &Option<PathBuf>| {
            path.as_ref()
                .map_or_else(String::new, |p| p.to_string_lossy().into_owned())
        };

        BTreeMap::from([
            ("background_color", self.background_color.clone()),
            ("css_file", path_field(&self.css_file)),
            ("format", self.format.as_str().to_owned()),
            ("height", self.height.to_string()),
            ("mermaid_config", path_field(&self.mermaid_config)),
            ("puppeteer_config", path_field(&self.puppeteer_config)),
            ("scale", self.scale.to_string()),
            ("theme", self.theme.clone()),
            ("width", self.width.to_string()),
        ])
    }
}

/// Parse a positive pixel dimension.
fn parse_dimension(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|&v| v > 0)
}
