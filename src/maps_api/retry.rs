use std::future::Future;
use std::time::Duration;

use super::overpass::UpstreamError;

/// Exponential backoff for rate-limited upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(retry))
    }

    /// Runs `op` until it succeeds, fails with something other than HTTP 429,
    /// or the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Err(err) if err.is_rate_limit() => {
                    if attempt >= self.max_retries {
                        return Err(UpstreamError::RateLimited { attempts: attempt + 1 });
                    }
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "upstream rate limited, retrying in {:?} (retry {} of {})",
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
