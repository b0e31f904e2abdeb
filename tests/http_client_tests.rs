use async_trait::async_trait;
use manga_sources::browser_client::BypassService;
use manga_sources::http_client::{build_client, Fetcher, HttpClientConfig};
use manga_sources::{Result, SourceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves `/blocked` with 403, `/missing` with 404, `/paged` with a page-count
/// header and anything else with 200
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, extra, body) = match path.as_str() {
                    "/blocked" => ("403 Forbidden", "", "<html>Just a moment...</html>"),
                    "/missing" => ("404 Not Found", "", "gone"),
                    "/paged" => ("200 OK", "X-WP-TotalPages: 3\r\n", "[]"),
                    _ => ("200 OK", "", "hello"),
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    extra,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Stands in for the headless browser: renders JSON the way Chrome shows it
struct FakeBrowser {
    calls: AtomicUsize,
}

#[async_trait]
impl BypassService for FakeBrowser {
    async fn get_content(&self, _url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"<html><body><pre>{"ok":true,"name":"A &amp; B"}</pre></body></html>"#.to_string())
    }
}

fn fetcher() -> Fetcher {
    let config = HttpClientConfig {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    Fetcher::new(build_client(&config).unwrap())
}

#[tokio::test]
async fn test_direct_fetch_succeeds() {
    let base = spawn_server().await;
    let text = fetcher().get_text(&format!("{}/ok", base)).await.unwrap();
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn test_blocked_request_falls_back_to_bypass() {
    let base = spawn_server().await;
    let browser = Arc::new(FakeBrowser { calls: AtomicUsize::new(0) });
    let fetcher = fetcher().with_bypass(Some(browser.clone() as Arc<dyn BypassService>));

    let text = fetcher.get_text(&format!("{}/blocked", base)).await.unwrap();
    assert_eq!(text, r#"{"ok":true,"name":"A & B"}"#);
    assert_eq!(browser.calls.load(Ordering::SeqCst), 1);

    let value: serde_json::Value = fetcher.get_json(&format!("{}/blocked", base)).await.unwrap();
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn test_blocked_without_bypass_reports_status() {
    let base = spawn_server().await;
    let err = fetcher().get_text(&format!("{}/blocked", base)).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(403)), "got {:?}", err);
    assert_eq!(fetcher().fetch(&format!("{}/blocked", base)).await, "");
}

#[tokio::test]
async fn test_not_found_never_uses_bypass() {
    let base = spawn_server().await;
    let browser = Arc::new(FakeBrowser { calls: AtomicUsize::new(0) });
    let fetcher = fetcher().with_bypass(Some(browser.clone() as Arc<dyn BypassService>));

    let err = fetcher.get_text(&format!("{}/missing", base)).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_headers_survive_and_blocked_still_bypasses() {
    let base = spawn_server().await;
    let browser = Arc::new(FakeBrowser { calls: AtomicUsize::new(0) });
    let fetcher = fetcher().with_bypass(Some(browser.clone() as Arc<dyn BypassService>));

    let (headers, body) = fetcher.get_text_and_headers(&format!("{}/paged", base)).await.unwrap();
    assert_eq!(headers["x-wp-totalpages"], "3");
    assert_eq!(body, "[]");
    assert_eq!(browser.calls.load(Ordering::SeqCst), 0);

    let (headers, body) = fetcher.get_text_and_headers(&format!("{}/blocked", base)).await.unwrap();
    assert!(headers.is_empty());
    assert_eq!(body, r#"{"ok":true,"name":"A & B"}"#);
    assert_eq!(browser.calls.load(Ordering::SeqCst), 1);
}
