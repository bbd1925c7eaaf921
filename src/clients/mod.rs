/// HTTP transport and the retrying fetch wrapper
use crate::errors::{FetchError, FetchResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Status and body of one HTTP exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a single GET. Implementations must resolve to
/// `FetchError::Cancelled` as soon as `cancel` fires.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = FetchResult<RawResponse>> + Send;
}

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("iss-tracker/1.0")
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpClient {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> FetchResult<RawResponse> {
        let request = async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            Ok::<_, FetchError>(RawResponse { status, body })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            resp = request => resp,
        }
    }
}

/// Wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Wait `base * 2^attempt` before the next attempt
    Exponential { base: Duration },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Backoff::None => None,
            Backoff::Exponential { base } => Some(*base * 2u32.saturating_pow(attempt)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            backoff: Backoff::None,
        }
    }

    pub fn exponential(retries: u32) -> Self {
        Self {
            retries,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        }
    }
}

/// GET `url` and parse the body as JSON, retrying failures per `policy`.
///
/// At most `policy.retries + 1` requests are issued. Cancellation is
/// never retried and wins over any other outcome.
pub async fn fetch_with_retry<T: Transport>(
    transport: &T,
    url: &str,
    cancel: &CancellationToken,
    policy: &RetryPolicy,
) -> FetchResult<Value> {
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let error = match transport.get(url, cancel).await {
            Ok(resp) if resp.is_success() => {
                return serde_json::from_str(&resp.body).map_err(FetchError::from);
            }
            Ok(resp) => FetchError::Status(resp.status),
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(_) if cancel.is_cancelled() => return Err(FetchError::Cancelled),
            Err(e) => e,
        };

        if attempt >= policy.retries {
            debug!(url, attempt, "retry budget exhausted");
            return Err(error);
        }

        warn!(url, attempt, code = error.code(), "fetch failed, retrying: {}", error);
        if let Some(delay) = policy.backoff.delay(attempt) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        attempt += 1;
    }
}

/// [`fetch_with_retry`], then deserialize into `B` and post-process with `transform`
pub async fn fetch_json<T, B, U, F>(
    transport: &T,
    url: &str,
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    transform: F,
) -> FetchResult<U>
where
    T: Transport,
    B: DeserializeOwned,
    F: FnOnce(B) -> U,
{
    let value = fetch_with_retry(transport, url, cancel, policy).await?;
    let body = serde_json::from_value(value)?;
    Ok(transform(body))
}


#[cfg(test)]
mod tests {
    use super::fake::{Reply, ScriptedTransport};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_success_returns_parsed_body() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(200, json!({"latitude": 1.5})));
        let value = fetch_with_retry(
            &transport,
            "http://iss",
            &CancellationToken::new(),
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();
        assert_eq!(value["latitude"], 1.5);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_budget() {
        for retries in 0..4 {
            let transport = ScriptedTransport::new(|_, _| Reply::Json(503, json!({})));
            let err = fetch_with_retry(
                &transport,
                "http://iss",
                &CancellationToken::new(),
                &RetryPolicy::immediate(retries),
            )
            .await
            .unwrap_err();
            assert_eq!(err, FetchError::Status(503));
            assert_eq!(transport.calls(), retries as usize + 1);
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let transport = ScriptedTransport::new(|_, n| {
            if n < 2 {
                Reply::Fail("connection reset".into())
            } else {
                Reply::Json(200, json!([1, 2, 3]))
            }
        });
        let value = fetch_with_retry(
            &transport,
            "http://iss",
            &CancellationToken::new(),
            &RetryPolicy::immediate(2),
        )
        .await
        .unwrap();
        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_nothing() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(200, json!({})));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_with_retry(&transport, "http://iss", &cancel, &RetryPolicy::immediate(5))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_request_is_not_retried() {
        let transport = ScriptedTransport::new(|_, _| Reply::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = fetch_with_retry(&transport, "http://iss", &cancel, &RetryPolicy::immediate(5))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_response_is_slow() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(500, json!({})))
            .with_latency(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = fetch_with_retry(&transport, "http://iss", &cancel, &RetryPolicy::immediate(3))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(500, json!({})));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = fetch_with_retry(
            &transport,
            "http://iss",
            &cancel,
            &RetryPolicy::exponential(3),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_waits_between_attempts() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(500, json!({})));
        let started = tokio::time::Instant::now();
        let err = fetch_with_retry(
            &transport,
            "http://iss",
            &CancellationToken::new(),
            &RetryPolicy::exponential(2),
        )
        .await
        .unwrap_err();
        assert_eq!(err, FetchError::Status(500));
        // 1s after the first failure, 2s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(200, json!("not an object")));
        let err = fetch_json::<_, Vec<u32>, _, _>(
            &transport,
            "http://iss",
            &CancellationToken::new(),
            &RetryPolicy::immediate(0),
            |v| v,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_transform_applied() {
        let transport = ScriptedTransport::new(|_, _| Reply::Json(200, json!([3, 1, 2])));
        let sorted = fetch_json(
            &transport,
            "http://iss",
            &CancellationToken::new(),
            &RetryPolicy::immediate(0),
            |mut v: Vec<u32>| {
                v.sort();
                v
            },
        )
        .await
        .unwrap();
        assert_eq!(sorted, vec![1, 2, 3]);
    }
}
