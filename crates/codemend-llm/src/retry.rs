use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

const BASE_BACKOFF_SECS: u64 = 1;

/// Delay before the next attempt: the `Retry-After` header in seconds when present,
/// exponential backoff otherwise.
pub(crate) fn retry_delay(response: &reqwest::Response, attempt: u32) -> Duration {
    if let Some(val) = response.headers().get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.parse::<u64>()
    {
        return Duration::from_secs(secs);
    }
    backoff(attempt)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(BASE_BACKOFF_SECS << attempt.min(16))
}

/// Send a request built by `f`, retrying up to `max_retries` times on 429.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` once all attempts are exhausted, or the
/// transport error as `LlmError::Http`.
pub(crate) async fn send_with_retry<F, Fut>(
    provider_name: &str,
    max_retries: u32,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    for attempt in 0..=max_retries {
        let response = f().await?;

        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt == max_retries {
            break;
        }

        let delay = retry_delay(&response, attempt);
        tracing::warn!(
            provider = provider_name,
            delay_secs = delay.as_secs(),
            attempt = attempt + 1,
            max_retries,
            "rate limited, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    Err(LlmError::RateLimited)
}
