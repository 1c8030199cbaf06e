//! Response classification and quota header parsing.
//!
//! - 2xx with a JSON body (or empty) → success
//! - 401 → auth expired
//! - 429 → rate limited (honours `retry-after`)
//! - 408, 5xx, connect/timeout errors → transient
//! - any other status, undecodable body → fatal

use super::FetchResult;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

const MAX_ERROR_BODY: usize = 200;

/// Quota metadata carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub limit: u32,
    pub remaining: Option<u32>,
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
}

/// Extracts quota metadata. Without a limit header there is nothing to retune from.
pub fn parse_quota(headers: &HeaderMap) -> Option<QuotaHeaders> {
    let limit = header_u32(headers, LIMIT_HEADER)?;
    Some(QuotaHeaders {
        limit,
        remaining: header_u32(headers, REMAINING_HEADER),
    })
}

/// `retry-after` in delta-seconds form.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Consumes a response and classifies it.
pub async fn classify_response(response: reqwest::Response) -> FetchResult {
    let status = response.status();

    if status.is_success() {
        return match response.bytes().await {
            Ok(bytes) if bytes.is_empty() => FetchResult::Success(Value::Null),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => FetchResult::Success(value),
                Err(e) => FetchResult::FatalError(format!("malformed payload: {}", e)),
            },
            Err(e) => FetchResult::TransientError(format!("failed to read body: {}", e)),
        };
    }

    match status {
        StatusCode::UNAUTHORIZED => FetchResult::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => FetchResult::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        },
        StatusCode::REQUEST_TIMEOUT => FetchResult::TransientError("request timeout (408)".into()),
        s if s.is_server_error() => FetchResult::TransientError(format!("server error {}", s)),
        s => {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            FetchResult::FatalError(format!("client error {}: {}", s, body))
        }
    }
}

/// Classifies a request that never produced a response.
pub fn classify_transport_error(error: &reqwest::Error) -> FetchResult {
    if error.is_decode() || error.is_builder() {
        FetchResult::FatalError(error.to_string())
    } else {
        FetchResult::TransientError(error.to_string())
    }
}
