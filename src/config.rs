use crate::error::{Result, SourceError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bot_detection: BotDetectionConfig,
    #[serde(default)]
    pub mangadex: MangaDexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotDetectionConfig {
    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Enable cookie support
    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Fall back to a headless browser when a site answers 403/503
    #[serde(default = "default_false")]
    pub enable_browser: bool,

    /// Browser timeout in seconds
    #[serde(default = "default_browser_timeout")]
    pub browser_timeout_secs: u64,

    /// Browser headless mode
    #[serde(default = "default_true")]
    pub browser_headless: bool,

    /// Disable images in browser (faster loading)
    #[serde(default = "default_true")]
    pub browser_disable_images: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MangaDexConfig {
    /// Translation language requested from MangaDex
    #[serde(default = "default_language")]
    pub language: String,

    /// Use compressed `data-saver` images from the at-home server
    #[serde(default = "default_true")]
    pub data_saver: bool,
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_timeout() -> u64 { 30 }
fn default_browser_timeout() -> u64 { 30 }
fn default_language() -> String { "id".to_string() }

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            enable_cookies: true,
            enable_compression: true,
            enable_browser: false, // requires Chrome
            browser_timeout_secs: 30,
            browser_headless: true,
            browser_disable_images: true,
        }
    }
}

impl Default for MangaDexConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            data_saver: true,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        if path.exists() {
            match Self::load_from(path) {
                Ok(cfg) => return cfg,
                Err(e) => log::warn!("Ignoring config.toml: {}", e),
            }
        }
        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SourceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).map_err(|e| SourceError::Config(e.to_string()))?;
        if cfg.mangadex.language.trim().is_empty() {
            return Err(SourceError::Config("mangadex.language must not be empty".to_string()));
        }
        Ok(cfg)
    }
}

impl BotDetectionConfig {
    /// Create an HTTP client configuration from this section
    pub fn http_client_config(&self) -> crate::http_client::HttpClientConfig {
        use std::time::Duration;

        crate::http_client::HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            enable_cookies: self.enable_cookies,
            enable_gzip: self.enable_compression,
        }
    }

    /// Create the browser configuration used for the bypass fallback
    pub fn browser_config(&self) -> crate::browser_client::BrowserConfig {
        use std::time::Duration;

        crate::browser_client::BrowserConfig {
            headless: self.browser_headless,
            timeout: Duration::from_secs(self.browser_timeout_secs),
            disable_images: self.browser_disable_images,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.mangadex.language, "id");
        assert!(cfg.mangadex.data_saver);
        assert!(!cfg.bot_detection.enable_browser);
        assert_eq!(cfg.bot_detection.timeout_secs, 30);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = Config::from_toml_str(
            r#"
            [bot_detection]
            timeout_secs = 10
            enable_browser = true

            [mangadex]
            language = "en"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bot_detection.timeout_secs, 10);
        assert!(cfg.bot_detection.enable_browser);
        assert!(cfg.bot_detection.browser_headless);
        assert_eq!(cfg.mangadex.language, "en");
        assert_eq!(cfg.bot_detection.http_client_config().timeout.as_secs(), 10);
    }

    #[test]
    fn test_rejects_empty_language() {
        let err = Config::from_toml_str("[mangadex]\nlanguage = \"\"").unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
