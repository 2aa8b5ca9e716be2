//! Bounded retry for provider HTTP calls.

use std::time::Duration;

use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::ProviderError;

/// Longest wait honoured from a `Retry-After` header.
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Retry limits for a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

/// Returns true if a response with this status is worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Delay before attempt `attempt + 1`.
pub fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&HeaderValue>,
) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Sends a request, retrying rate limits, server errors and transport failures.
///
/// The final response is returned as-is, so callers still map non-success
/// statuses themselves.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, ProviderError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(transport_error);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < attempts {
                    let delay = retry_delay(attempt, policy, response.headers().get(RETRY_AFTER));
                    tracing::warn!(
                        attempt,
                        attempts,
                        status = %status,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying provider request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(transport_error(err));
            }
        }
    }

    Err(ProviderError::Connection(
        "request exhausted retries".to_string(),
    ))
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy::default();
        let header = HeaderValue::from_static("120");
        assert_eq!(
            retry_delay(1, &policy, Some(&header)),
            Duration::from_secs(MAX_RETRY_AFTER_SECS)
        );
    }

    #[test]
    fn backoff_grows_and_is_bounded() {
        let policy = RetryPolicy::default();
        let first = retry_delay(1, &policy, None);
        assert!(first >= Duration::from_millis(250));
        assert!(first < Duration::from_millis(400));

        let late = retry_delay(10, &policy, None);
        assert!(late >= Duration::from_millis(2_000));
        assert!(late < Duration::from_millis(2_150));
    }
}
