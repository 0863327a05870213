// src/ingest/http.rs
//! Shared HTTP client and status mapping for all adapters.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};

use crate::ingest::error::{FetchError, FetchResult};

/// Several upstreams reject unidentified or non-browser clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Used when a 429 carries no parsable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Build one client for every adapter. Per-request timeouts are applied by
/// the orchestrator, only the connect phase is bounded here.
pub fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a response status into the fetch error taxonomy.
pub fn check_status(resp: Response, target: &str) -> FetchResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(FetchError::Unauthorized(target.to_string()))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound(target.to_string())),
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited {
            retry_after: retry_after(&resp).unwrap_or(DEFAULT_RETRY_AFTER),
        }),
        other => Err(FetchError::Status(other.as_u16())),
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// GET `url` and return the body as text, mapped through [`check_status`].
pub async fn get_text(client: &Client, url: &str) -> FetchResult<String> {
    let resp = client.get(url).send().await?;
    let resp = check_status(resp, url)?;
    Ok(resp.text().await?)
}
