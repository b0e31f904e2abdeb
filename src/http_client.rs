use crate::browser_client::BypassService;
use crate::error::{Result, SourceError};
use crate::helpers::{cached_regex, decode_html_entities};
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Configuration for the shared HTTP client
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub enable_cookies: bool,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            enable_cookies: true,
            enable_gzip: true,
        }
    }
}

/// Build a client that looks like a desktop browser
pub fn build_client(config: &HttpClientConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("id-ID,id;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));

    let client = ClientBuilder::new()
        .timeout(config.timeout)
        .user_agent(random_user_agent())
        .cookie_store(config.enable_cookies)
        .gzip(config.enable_gzip)
        .brotli(config.enable_gzip)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .default_headers(headers)
        .build()?;

    Ok(client)
}

/// Get a random user agent from the pool
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

/// Check if a status code means the site is blocking automated clients
pub fn is_block_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 403 | 503)
}

/// When the browser bypass is attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Only on 403/503
    #[default]
    OnBlock,
    /// On any failure of the direct request
    OnAnyError,
}

/// Content rendered by a browser often wraps a JSON body in `<pre>`; unwrap it
/// so callers see the same text a direct request would have returned.
pub fn unwrap_bypass_content(content: &str) -> String {
    static PRE: OnceLock<Option<Regex>> = OnceLock::new();
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();

    if !content.contains("<pre") {
        return content.to_string();
    }

    let inner = cached_regex(&PRE, r"(?is)<pre[^>]*>(.*?)</pre>")
        .and_then(|re| re.captures(content))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| content.to_string());

    let stripped = match cached_regex(&TAGS, r"<[^>]*>") {
        Some(re) => re.replace_all(&inner, "").into_owned(),
        None => inner,
    };

    decode_html_entities(stripped.trim())
}

/// Per-adapter view over the shared client: default headers plus the optional
/// browser bypass used when a site blocks direct requests.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    headers: HeaderMap,
    bypass: Option<Arc<dyn BypassService>>,
    policy: FallbackPolicy,
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
            bypass: None,
            policy: FallbackPolicy::OnBlock,
        }
    }

    pub fn with_bypass(mut self, bypass: Option<Arc<dyn BypassService>>) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add a header sent with every request from this fetcher
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                self.headers.insert(n, v);
            }
            _ => log::warn!("Skipping invalid header {}: {}", name, value),
        }
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn has_bypass(&self) -> bool {
        self.bypass.is_some()
    }

    /// Issue a GET with this fetcher's headers plus `extra`, returning the raw response
    pub async fn get_response(&self, url: &str, extra: Option<HeaderMap>) -> Result<Response> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .headers(self.headers.clone());
        if let Some(extra) = extra {
            request = request.headers(extra);
        }
        Ok(request.send().await?)
    }

    /// Fetch text, falling back to the browser bypass when blocked
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.get_text_with_headers(url, None).await
    }

    pub async fn get_text_with_headers(&self, url: &str, extra: Option<HeaderMap>) -> Result<String> {
        let direct = match self.get_response(url, extra).await {
            Ok(resp) => Self::read_body(resp).await,
            Err(e) => Err(e),
        };
        self.recover(url, direct).await
    }

    /// `get_text` that also hands back the response headers. Content recovered
    /// through the browser bypass comes with an empty header map.
    pub async fn get_text_and_headers(&self, url: &str) -> Result<(HeaderMap, String)> {
        let direct = match self.get_response(url, None).await {
            Ok(resp) => {
                let headers = resp.headers().clone();
                Self::read_body(resp).await.map(|body| (headers, body))
            }
            Err(e) => Err(e),
        };
        match direct {
            Ok(pair) => Ok(pair),
            Err(e) => self.recover(url, Err(e)).await.map(|body| (HeaderMap::new(), body)),
        }
    }

    /// POST a form, with the same block handling as `get_text`
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        extra: Option<HeaderMap>,
    ) -> Result<String> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .headers(self.headers.clone())
            .form(form);
        if let Some(extra) = extra {
            request = request.headers(extra);
        }

        let direct = match request.send().await {
            Ok(resp) => Self::read_body(resp).await,
            Err(e) => Err(e.into()),
        };
        self.recover(url, direct).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get_text(url).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The lenient form: any failure is logged and yields an empty string
    pub async fn fetch(&self, url: &str) -> String {
        match self.get_text(url).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Fetch failed for {}: {}", url, e);
                String::new()
            }
        }
    }

    /// Go straight to the browser, for adapters that retry zero-result pages
    pub async fn fetch_via_bypass(&self, url: &str) -> Result<String> {
        let bypass = self
            .bypass
            .as_ref()
            .ok_or_else(|| SourceError::Blocked(format!("no bypass configured for {}", url)))?;
        let content = bypass.get_content(url).await?;
        Ok(unwrap_bypass_content(&content))
    }

    async fn read_body(resp: Response) -> Result<String> {
        let status = resp.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => SourceError::NotFound(resp.url().to_string()),
                other => SourceError::Status(other.as_u16()),
            });
        }
        Ok(resp.text().await?)
    }

    fn should_bypass(&self, err: &SourceError) -> bool {
        match (self.policy, err) {
            (_, SourceError::Status(403 | 503)) => true,
            (FallbackPolicy::OnAnyError, SourceError::NotFound(_)) => false,
            (FallbackPolicy::OnAnyError, _) => true,
            _ => false,
        }
    }

    async fn recover(&self, url: &str, direct: Result<String>) -> Result<String> {
        let err = match direct {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        if !self.should_bypass(&err) {
            return Err(err);
        }
        let Some(bypass) = self.bypass.as_ref() else {
            return Err(err);
        };

        log::info!("Direct request to {} failed ({}), trying browser bypass", url, err);
        match bypass.get_content(url).await {
            Ok(content) => Ok(unwrap_bypass_content(&content)),
            Err(bypass_err) => {
                log::warn!("Browser bypass failed for {}: {}", url, bypass_err);
                Err(SourceError::Blocked(format!("{} ({})", url, bypass_err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_status() {
        assert!(is_block_status(StatusCode::FORBIDDEN));
        assert!(is_block_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_block_status(StatusCode::NOT_FOUND));
        assert!(!is_block_status(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_unwrap_pre_json() {
        let rendered = r#"<html><head></head><body><pre style="word-wrap: break-word;">{"title":"Tom &amp; Jerry"}</pre></body></html>"#;
        assert_eq!(unwrap_bypass_content(rendered), r#"{"title":"Tom & Jerry"}"#);
        assert_eq!(unwrap_bypass_content("<div>plain</div>"), "<div>plain</div>");
    }

    #[test]
    fn test_client_builds() {
        assert!(build_client(&HttpClientConfig::default()).is_ok());
    }

    #[test]
    fn test_fallback_policy() {
        let client = build_client(&HttpClientConfig::default()).unwrap();
        let on_block = Fetcher::new(client.clone());
        assert!(on_block.should_bypass(&SourceError::Status(403)));
        assert!(!on_block.should_bypass(&SourceError::Status(500)));

        let any = Fetcher::new(client).with_policy(FallbackPolicy::OnAnyError);
        assert!(any.should_bypass(&SourceError::Status(500)));
        assert!(!any.should_bypass(&SourceError::NotFound("x".into())));
    }
}
