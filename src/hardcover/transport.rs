use std::time::Duration;

use serde_json::{Value, json};
use tokio::{
    sync::{Mutex, Semaphore},
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;

use super::models::GraphqlResponse;
use crate::error::{AbsHardcoverResult, SyncError};

pub const USER_AGENT: &str = concat!("abs-hardcover-sync/", env!("CARGO_PKG_VERSION"));

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between requests once the burst is used up.
    pub min_interval: Duration,
    /// Requests allowed through without spacing.
    pub burst: u32,
    /// Maximum requests in flight at once; callers beyond this block.
    pub max_in_flight: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            min_interval: Duration::from_millis(1500),
            burst: 2,
            max_in_flight: 3,
        }
    }
}

impl RateLimitConfig {
    pub fn with_rate_ms(rate_ms: u64) -> Self {
        RateLimitConfig {
            min_interval: Duration::from_millis(rate_ms.max(1)),
            ..Default::default()
        }
    }
}

// Token bucket: capacity = burst, one token back per min_interval.
struct RateGate {
    tokens: u32,
    last_refill: Instant,
}

/// Wire-level GraphQL transport. All calls are spaced by the rate gate,
/// bounded by the in-flight semaphore, retried on 429/5xx/transport errors,
/// and abandoned promptly when the run's cancellation token fires.
pub struct Transport {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    limits: RateLimitConfig,
    gate: Mutex<RateGate>,
    slots: Semaphore,
    cancel: CancellationToken,
}

impl Transport {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        limits: RateLimitConfig,
        cancel: CancellationToken,
    ) -> AbsHardcoverResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Transport {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
            gate: Mutex::new(RateGate {
                tokens: limits.burst,
                last_refill: Instant::now(),
            }),
            slots: Semaphore::new(limits.max_in_flight),
            limits,
            cancel,
        })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one GraphQL document and return its `data` value. A non-empty
    /// `errors` array is a call failure even on HTTP 200.
    pub async fn execute(&self, query: &str, variables: Value) -> AbsHardcoverResult<Value> {
        let _permit = tokio::select! {
            permit = self.slots.acquire() => permit.map_err(|_| SyncError::Cancelled)?,
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled.into()),
        };

        let body = json!({ "query": query, "variables": variables });
        let mut saw_rate_limit = false;

        for attempt in 1..=MAX_ATTEMPTS {
            self.acquire_rate_slot().await?;

            let send = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.token)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .json(&body)
                .send();
            let result = tokio::select! {
                result = send => result,
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled.into()),
            };

            let failure = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: GraphqlResponse = resp.json().await?;
                        if !parsed.errors.is_empty() {
                            let message = parsed
                                .errors
                                .iter()
                                .map(|e| e.message.as_str())
                                .collect::<Vec<_>>()
                                .join("; ");
                            return Err(SyncError::upstream(status.as_u16(), message).into());
                        }
                        return Ok(parsed.data.unwrap_or(Value::Null));
                    }
                    if status.as_u16() == 429 {
                        saw_rate_limit = true;
                        format!("rate limited (attempt {attempt})")
                    } else if status.is_server_error() {
                        format!("server error {status} (attempt {attempt})")
                    } else {
                        // Other 4xx: not retryable.
                        let message = resp.text().await.unwrap_or_default();
                        return Err(SyncError::upstream(status.as_u16(), message).into());
                    }
                }
                Err(e) => format!("transport error: {e} (attempt {attempt})"),
            };

            if attempt == MAX_ATTEMPTS {
                break;
            }
            let backoff = backoff_for(attempt);
            tracing::debug!(%failure, backoff_ms = backoff.as_millis() as u64, "retrying hardcover call");
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled.into()),
            }
        }

        if saw_rate_limit {
            Err(SyncError::RateLimited {
                attempts: MAX_ATTEMPTS,
            }
            .into())
        } else {
            Err(SyncError::upstream(0, format!("gave up after {MAX_ATTEMPTS} attempts")).into())
        }
    }

    async fn acquire_rate_slot(&self) -> Result<(), SyncError> {
        loop {
            let wait = {
                let mut gate = self.gate.lock().await;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(gate.last_refill);
                let interval_ms = self.limits.min_interval.as_millis().max(1);
                let refills = (elapsed.as_millis() / interval_ms) as u32;
                if refills > 0 {
                    gate.tokens = (gate.tokens + refills).min(self.limits.burst.max(1));
                    gate.last_refill += self.limits.min_interval * refills;
                }
                if gate.tokens > 0 {
                    gate.tokens -= 1;
                    None
                } else {
                    Some(gate.last_refill + self.limits.min_interval - now)
                }
            };
            match wait {
                None => return Ok(()),
                Some(delay) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                    }
                }
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    exp.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_transport(limits: RateLimitConfig, cancel: CancellationToken) -> Transport {
        Transport::new("http://localhost:1/graphql", "token", limits, cancel).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(2), Duration::from_secs(2));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_passes_immediately_then_spacing_applies() {
        let transport = test_transport(
            RateLimitConfig {
                min_interval: Duration::from_millis(1500),
                burst: 2,
                max_in_flight: 3,
            },
            CancellationToken::new(),
        );

        let start = Instant::now();
        transport.acquire_rate_slot().await.unwrap();
        transport.acquire_rate_slot().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        transport.acquire_rate_slot().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert!(start.elapsed() < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn one_second_window_stays_within_budget() {
        // With rate 500 ms and burst 2, any 1 s window may carry at most
        // burst + floor(1000/500) = 4 requests.
        let transport = test_transport(
            RateLimitConfig {
                min_interval: Duration::from_millis(500),
                burst: 2,
                max_in_flight: 3,
            },
            CancellationToken::new(),
        );

        let start = Instant::now();
        let mut issued = 0u32;
        loop {
            transport.acquire_rate_slot().await.unwrap();
            if start.elapsed() > Duration::from_secs(1) {
                break;
            }
            issued += 1;
        }
        assert!(issued <= 4, "issued {issued} requests in one second");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_rate_wait() {
        let cancel = CancellationToken::new();
        let transport = test_transport(
            RateLimitConfig {
                min_interval: Duration::from_secs(60),
                burst: 1,
                max_in_flight: 3,
            },
            cancel.clone(),
        );

        transport.acquire_rate_slot().await.unwrap();
        let waiter = tokio::spawn(async move { transport.acquire_rate_slot().await });
        tokio::task::yield_now().await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn execute_fails_immediately_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport = test_transport(RateLimitConfig::default(), cancel);
        let err = transport
            .execute("query { me { id } }", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(crate::error::is_cancellation(&err));
    }
}
