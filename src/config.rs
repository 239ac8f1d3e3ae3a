//! Configuration types for drawing analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built
//! via its [`AnalysisConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across a batch, serialise them for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new
//! field. The builder lets callers set only what they care about and rely
//! on documented defaults for the rest.

use crate::error::BomError;
use crate::progress::AnalysisProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for an extraction-and-assembly invocation.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use planbom::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .dpi(300)
///     .concurrency(2)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Rasterization DPI for PDF pages. Range: 72–600. Default: 300.
    ///
    /// BOM tables on drawings use small fonts; 300 DPI keeps part numbers
    /// legible to the vision model. Lower it for very large sheets where
    /// upload size matters more than pixel density.
    pub dpi: u32,

    /// Raster output format handed to the external tool ("png" or "jpeg").
    /// Default: "png" — lossless, so table text stays crisp.
    pub raster_format: RasterFormat,

    /// Number of pages extracted concurrently in a PDF batch. Default: 3.
    ///
    /// The extraction service is network-bound; a small pool cuts
    /// wall-clock time without tripping provider rate limits. Raise it if
    /// your account's limits allow, lower it on 429s.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the extraction call. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is on the sheet,
    /// which is exactly what table transcription wants.
    pub temperature: f32,

    /// Maximum tokens the model may generate per unit. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a retryable service failure. Default: 3.
    ///
    /// Only service-unavailable errors (429/5xx/timeouts) are retried;
    /// rejections and malformed responses surface immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s, so concurrent
    /// workers don't hammer a recovering endpoint in lockstep.
    pub retry_backoff_ms: u64,

    /// Free-text context forwarded to the extraction service alongside the
    /// image (e.g. "residential door schedule, metric units").
    pub context_text: Option<String>,

    /// Custom system prompt. If None, uses the built-in schema contract.
    pub system_prompt: Option<String>,

    /// Per-extraction-call timeout in seconds. Default: 45.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress callback fired per unit. Default: none.
    pub progress_callback: Option<Arc<dyn AnalysisProgressCallback>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            raster_format: RasterFormat::default(),
            concurrency: 3,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            context_text: None,
            system_prompt: None,
            api_timeout_secs: 45,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("dpi", &self.dpi)
            .field("raster_format", &self.raster_format)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("context_text", &self.context_text)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn raster_format(mut self, format: RasterFormat) -> Self {
        self.config.raster_format = format;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn context_text(mut self, text: impl Into<String>) -> Self {
        self.config.context_text = Some(text.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn AnalysisProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, BomError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(BomError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(BomError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(BomError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// Output format for the external rasterization tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    /// Lossless; the default for drawings with fine table text.
    #[default]
    Png,
    /// Smaller files; acceptable for photographic scans.
    Jpeg,
}

impl RasterFormat {
    /// Flag understood by `pdftoppm` (`-png` / `-jpeg`).
    pub fn tool_flag(&self) -> &'static str {
        match self {
            RasterFormat::Png => "-png",
            RasterFormat::Jpeg => "-jpeg",
        }
    }

    /// Output file extension produced by the tool.
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
        }
    }

    /// MIME type of the produced raster.
    pub fn mime_type(&self) -> &'static str {
        match self {
            RasterFormat::Png => "image/png",
            RasterFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for RasterFormat {
    type Err = BomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(RasterFormat::Png),
            "jpeg" | "jpg" => Ok(RasterFormat::Jpeg),
            other => Err(BomError::InvalidConfig(format!(
                "Unknown raster format '{other}' (expected png or jpeg)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = AnalysisConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 300);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff_ms, 500);
        assert_eq!(config.raster_format, RasterFormat::Png);
    }

    #[test]
    fn builder_clamps_dpi() {
        let config = AnalysisConfig::builder().dpi(10_000).build().unwrap();
        assert_eq!(config.dpi, 600);
        let config = AnalysisConfig::builder().dpi(10).build().unwrap();
        assert_eq!(config.dpi, 72);
    }

    #[test]
    fn builder_clamps_concurrency() {
        let config = AnalysisConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn raster_format_parse() {
        assert_eq!("png".parse::<RasterFormat>().unwrap(), RasterFormat::Png);
        assert_eq!("JPG".parse::<RasterFormat>().unwrap(), RasterFormat::Jpeg);
        assert!("webp".parse::<RasterFormat>().is_err());
    }

    #[test]
    fn raster_format_tool_strings() {
        assert_eq!(RasterFormat::Png.tool_flag(), "-png");
        assert_eq!(RasterFormat::Jpeg.extension(), "jpg");
        assert_eq!(RasterFormat::Png.mime_type(), "image/png");
    }
}
