use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounds the request *rate*: at most `permits` requests may start within any
/// `window`, because each permit is only returned once the window has elapsed
/// after it was taken.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(permits: usize, window: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            window,
        }
    }

    /// Process-wide limiter for the MangaDex API: 3 requests per second
    pub fn mangadex() -> &'static RateLimiter {
        static LIMITER: OnceLock<RateLimiter> = OnceLock::new();
        LIMITER.get_or_init(|| RateLimiter::new(3, Duration::from_secs(1)))
    }

    /// Wait for a permit, then schedule its release one window from now
    pub async fn acquire(&self) {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => {
                let window = self.window;
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    drop(permit);
                });
            }
            // The semaphore is never closed; proceed unthrottled if it ever is
            Err(e) => log::warn!("Rate limiter closed: {}", e),
        }
    }

    /// Run `fut` after acquiring a permit
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire().await;
        fut.await
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
