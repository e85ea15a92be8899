use std::time::Duration;

use reqwest::{Client, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{OsfError, TransientFailure};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Retry budget shared by rate limiting and network failures.
///
/// The backoff is constant: no jitter and no exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF)
    }
}

#[derive(Clone)]
pub struct Transport {
    http: Client,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_http(Client::new(), policy)
    }

    pub fn with_http(http: Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `request`, retrying 429s, timeouts and network failures.
    ///
    /// Any other status, success or not, is handed back untouched.
    pub async fn execute(&self, request: Request) -> Result<Response, OsfError> {
        let method = request.method().clone();
        let url = request.url().clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let pending = request.try_clone().ok_or(OsfError::UnclonableRequest)?;
            let outcome = tokio::time::timeout(self.policy.attempt_timeout, self.http.execute(pending))
                .await;
            let failure = match outcome {
                Ok(Ok(response)) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    TransientFailure::RateLimited
                }
                Ok(Ok(response)) => {
                    debug!(%method, %url, status = %response.status(), attempt, "response received");
                    return Ok(response);
                }
                Ok(Err(err)) if err.is_builder() => return Err(OsfError::Request(err)),
                Ok(Err(err)) => TransientFailure::Network(err),
                Err(_) => TransientFailure::Timeout,
            };

            if attempt >= self.policy.max_attempts {
                warn!(%method, %url, attempt, cause = %failure, "retry budget exhausted");
                return Err(OsfError::RetriesExhausted {
                    attempts: attempt,
                    cause: failure,
                });
            }
            warn!(%method, %url, attempt, cause = %failure, "transient failure, backing off");
            tokio::time::sleep(self.policy.backoff).await;
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
