mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;
use std::fmt;

/// A completed HTTP exchange that came back with a non-success status.
///
/// Kept as a distinct error type so callers can branch on the status class
/// (the combined transit-status request falls back to per-mode requests
/// only on a client error).
#[derive(Debug)]
pub struct HttpStatusError {
    pub status: reqwest::StatusCode,
    pub body: String,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed with status {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpStatusError {}

/// Fetches a URL and decodes the response body as JSON.
///
/// Non-success statuses become an [`HttpStatusError`]; transport failures
/// surface as the underlying `reqwest` error.
pub async fn fetch_json<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<serde_json::Value> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(HttpStatusError { status, body }.into());
    }

    Ok(resp.json().await?)
}

/// Returns `true` if `err` is an HTTP response with a 4xx status.
pub fn is_client_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HttpStatusError>()
        .is_some_and(|e| e.status.is_client_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_client_error_matches_4xx_only() {
        let not_found: anyhow::Error =
            HttpStatusError { status: reqwest::StatusCode::NOT_FOUND, body: String::new() }.into();
        let server: anyhow::Error = HttpStatusError {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }
        .into();
        let other = anyhow::anyhow!("connection reset");

        assert!(is_client_error(&not_found));
        assert!(!is_client_error(&server));
        assert!(!is_client_error(&other));
    }
}
