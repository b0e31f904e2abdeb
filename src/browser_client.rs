use crate::error::{Result, SourceError};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Renders a page in a real browser engine when a site blocks direct requests
#[async_trait]
pub trait BypassService: Send + Sync {
    /// Fully materialized content of `url` after any anti-bot challenge has cleared
    async fn get_content(&self, url: &str) -> Result<String>;
}

/// Configuration for headless browser
#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub timeout: Duration,
    pub disable_images: bool,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            timeout: Duration::from_secs(30),
            disable_images: true,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        }
    }
}

const CHALLENGE_SELECTORS: &[&str] = &[
    "#cf-challenge-running",
    ".cf-browser-verification",
    "#challenge-running",
    ".challenge-form",
];

const CHALLENGE_TITLES: &[&str] = &["just a moment", "attention required", "checking your browser"];

/// Bypass backed by headless Chrome. A browser is launched per request on a
/// blocking thread, so nothing is held open between calls.
pub struct HeadlessBypass {
    config: BrowserConfig,
}

impl HeadlessBypass {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn launch(config: &BrowserConfig) -> Result<Browser> {
        use std::ffi::OsStr;

        let images_arg = config
            .disable_images
            .then(|| "--blink-settings=imagesEnabled=false".to_string());
        let user_agent_arg = config.user_agent.as_ref().map(|ua| format!("--user-agent={}", ua));

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--no-sandbox"),
        ];
        if let Some(ref img) = images_arg {
            args.push(OsStr::new(img));
        }
        if let Some(ref ua) = user_agent_arg {
            args.push(OsStr::new(ua));
        }

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .args(args)
            .build()
            .map_err(|e| SourceError::Browser(e.to_string()))?;

        Browser::new(options).map_err(|e| SourceError::Browser(e.to_string()))
    }

    fn has_challenge(tab: &Arc<Tab>) -> bool {
        let title = tab.get_title().unwrap_or_default().to_lowercase();
        if CHALLENGE_TITLES.iter().any(|t| title.contains(t)) {
            return true;
        }
        CHALLENGE_SELECTORS
            .iter()
            .any(|sel| tab.find_element(sel).is_ok())
    }

    /// Navigate, wait out any challenge page, and return the rendered HTML
    fn render(config: &BrowserConfig, url: &str) -> Result<String> {
        let browser = Self::launch(config)?;
        let tab = browser
            .new_tab()
            .map_err(|e| SourceError::Browser(e.to_string()))?;

        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| SourceError::Browser(format!("navigation to {} failed: {}", url, e)))?;

        let deadline = Instant::now() + config.timeout;
        while Self::has_challenge(&tab) {
            if Instant::now() >= deadline {
                return Err(SourceError::Blocked(format!("challenge did not clear for {}", url)));
            }
            log::debug!("Waiting for challenge to clear on {}", url);
            std::thread::sleep(Duration::from_millis(1000));
        }

        tab.wait_for_element_with_custom_timeout("body", config.timeout)
            .map_err(|e| SourceError::Browser(e.to_string()))?;

        tab.get_content().map_err(|e| SourceError::Browser(e.to_string()))
    }
}

#[async_trait]
impl BypassService for HeadlessBypass {
    async fn get_content(&self, url: &str) -> Result<String> {
        log::info!("Browser bypass navigating to: {}", url);

        let config = self.config.clone();
        let target = url.to_string();
        tokio::task::spawn_blocking(move || Self::render(&config, &target))
            .await
            .map_err(|e| SourceError::Browser(format!("browser task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert!(config.disable_images);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn test_headless_bypass_renders_page() {
        let bypass = HeadlessBypass::new(BrowserConfig::default());
        match bypass.get_content("https://example.com").await {
            Ok(html) => assert!(html.contains("Example Domain")),
            Err(e) => eprintln!("Warning: browser bypass failed: {}", e),
        }
    }
}
