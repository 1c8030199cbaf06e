//! Resilient request execution.
//!
//! Every upstream call goes through [`RequestExecutor::execute`]:
//!
//! 1. Acquire a slot from the family's throttle (may wait)
//! 2. Attach the current bearer token
//! 3. Dispatch with the client's response timeout
//! 4. Classify the outcome and retune the throttle from quota headers
//! 5. Retry per policy: one refresh-and-retry on 401, bounded backoff on
//!    429/transient failures, never on fatal ones
//!
//! Dispatches and retry backoff share one deadline per `execute`. Time spent
//! queued for a throttle slot or a token does not count against it.

pub mod classify;
mod retry;

pub use retry::RetryPolicy;

use crate::credentials::{AccessToken, CredentialManager};
use crate::rate_limit::{EndpointFamily, ThrottleRegistry};
use crate::SyncError;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::classify::QuotaHeaders;

/// One upstream request, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Outcome of a request. Consumed immediately, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Success(Value),
    RateLimited { retry_after: Option<Duration> },
    AuthExpired,
    TransientError(String),
    FatalError(String),
}

impl FetchResult {
    /// Converts a final outcome into the crate error taxonomy.
    pub fn into_result(self) -> Result<Value, SyncError> {
        match self {
            FetchResult::Success(value) => Ok(value),
            FetchResult::RateLimited { retry_after } => Err(SyncError::RateLimited { retry_after }),
            FetchResult::AuthExpired => Err(SyncError::TokenExpired),
            FetchResult::TransientError(cause) => Err(SyncError::Transient(cause)),
            FetchResult::FatalError(cause) => Err(SyncError::Fatal(cause)),
        }
    }
}

impl fmt::Display for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchResult::Success(_) => f.write_str("success"),
            FetchResult::RateLimited { retry_after } => {
                write!(f, "rate limited (retry after {:?})", retry_after)
            }
            FetchResult::AuthExpired => f.write_str("auth expired"),
            FetchResult::TransientError(cause) => write!(f, "transient: {}", cause),
            FetchResult::FatalError(cause) => write!(f, "fatal: {}", cause),
        }
    }
}

/// Throttled, authenticated, retrying request executor.
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
    throttles: Arc<ThrottleRegistry>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl RequestExecutor {
    /// Creates an executor.
    ///
    /// # Arguments
    /// * `http` - Client carrying the per-response timeout
    /// * `base_url` - Versioned API root, without trailing slash
    /// * `credentials` - Token source
    /// * `throttles` - Per-family throttles
    /// * `retry` - Retry bound and backoff schedule
    /// * `deadline` - Budget for dispatches and backoff within one `execute`
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<CredentialManager>,
        throttles: Arc<ThrottleRegistry>,
        retry: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            throttles,
            retry,
            deadline,
        }
    }

    pub fn throttles(&self) -> &Arc<ThrottleRegistry> {
        &self.throttles
    }

    /// Executes `request` under `family`'s throttle and retry policy.
    ///
    /// Returns `Success`, `AuthExpired` (401 after one refresh, or no usable
    /// credentials) or `FatalError`.
    /// Rate-limited and transient outcomes are retried and surface as
    /// `FatalError` once the retry budget or deadline is spent.
    pub async fn execute(&self, family: EndpointFamily, request: &ApiRequest) -> FetchResult {
        let throttle = self.throttles.throttle_for(family);
        let mut attempt: u32 = 0;
        let mut refreshed = false;
        // Spent only while a request is on the wire or backing off.
        let mut budget = self.deadline;

        loop {
            let token = match self.credentials.get_token().await {
                Ok(token) => token,
                Err(e) => return credential_failure(family, request, e),
            };

            let (result, quota) = {
                let _permit = match throttle.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return FetchResult::FatalError(e.to_string()),
                };
                let started = Instant::now();
                let outcome = tokio::time::timeout(budget, self.dispatch(request, &token)).await;
                budget = budget.saturating_sub(started.elapsed());
                match outcome {
                    Ok(outcome) => outcome,
                    Err(_) => return self.deadline_exceeded(family, request),
                }
            };

            // Absent metadata keeps the current ceiling.
            if let Some(quota) = quota {
                throttle.retune(quota.limit, quota.remaining);
            }

            match result {
                FetchResult::AuthExpired if !refreshed => {
                    refreshed = true;
                    info!(family = %family, request = %request, "Token rejected, refreshing and retrying once");
                    if let Err(e) = self.credentials.refresh_after_rejection(&token).await {
                        return credential_failure(family, request, e);
                    }
                }
                FetchResult::RateLimited { .. } | FetchResult::TransientError(_) => {
                    let retry_after = match &result {
                        FetchResult::RateLimited { retry_after } => {
                            if quota.is_none() {
                                throttle.penalize();
                            }
                            *retry_after
                        }
                        _ => None,
                    };

                    if attempt >= self.retry.max_retries {
                        warn!(
                            family = %family,
                            request = %request,
                            retries = attempt,
                            last = %result,
                            "Retries exhausted"
                        );
                        return FetchResult::FatalError(format!(
                            "{} gave up after {} retries: {}",
                            request, attempt, result
                        ));
                    }

                    let delay = self
                        .retry
                        .delay_for(attempt)
                        .max(retry_after.unwrap_or_default());
                    if delay >= budget {
                        return self.deadline_exceeded(family, request);
                    }
                    warn!(
                        family = %family,
                        request = %request,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        outcome = %result,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    budget -= delay;
                    attempt += 1;
                }
                other => {
                    debug!(family = %family, request = %request, outcome = %other, "Request finished");
                    return other;
                }
            }
        }
    }

    /// Executes and deserializes a successful payload into `T`.
    pub async fn get_json<T>(&self, family: EndpointFamily, request: &ApiRequest) -> Result<T, SyncError>
    where
        T: DeserializeOwned,
    {
        let value = self.execute(family, request).await.into_result()?;
        serde_json::from_value(value).map_err(|e| SyncError::malformed(request.to_string(), e))
    }

    fn deadline_exceeded(&self, family: EndpointFamily, request: &ApiRequest) -> FetchResult {
        warn!(family = %family, request = %request, deadline = ?self.deadline, "Request deadline exceeded");
        FetchResult::FatalError(format!("{} exceeded deadline of {:?}", request, self.deadline))
    }

    async fn dispatch(&self, request: &ApiRequest, token: &AccessToken) -> (FetchResult, Option<QuotaHeaders>) {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(token.value())
            .header("Accept", "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                let quota = classify::parse_quota(response.headers());
                (classify::classify_response(response).await, quota)
            }
            Err(e) => (classify::classify_transport_error(&e), None),
        }
    }
}

/// No usable token: auth failures stay auth failures so callers abort.
fn credential_failure(family: EndpointFamily, request: &ApiRequest, error: SyncError) -> FetchResult {
    warn!(family = %family, request = %request, error = %error, "No usable access token");
    if error.is_auth() {
        FetchResult::AuthExpired
    } else {
        FetchResult::FatalError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_maps_taxonomy() {
        assert!(FetchResult::Success(Value::Null).into_result().is_ok());
        assert!(matches!(
            FetchResult::AuthExpired.into_result(),
            Err(SyncError::TokenExpired)
        ));
        assert!(matches!(
            FetchResult::RateLimited { retry_after: None }.into_result(),
            Err(SyncError::RateLimited { .. })
        ));
        assert!(matches!(
            FetchResult::TransientError("x".into()).into_result(),
            Err(SyncError::Transient(_))
        ));
        assert!(matches!(
            FetchResult::FatalError("x".into()).into_result(),
            Err(SyncError::Fatal(_))
        ));
    }

    #[test]
    fn test_request_builder_and_display() {
        let request = ApiRequest::get("/machines").query("page", 2).query("per_page", 100);
        assert_eq!(request.path(), "/machines");
        assert_eq!(request.to_string(), "GET /machines");
        assert_eq!(
            request.query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("per_page".to_string(), "100".to_string())
            ]
        );
    }
}
