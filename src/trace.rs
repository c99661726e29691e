//! Request traces: one record per outbound call, captured for lineage.
//!
//! Traces are sanitized at construction time, so no credential-bearing URL
//! ever exists in a form that could be serialized. Adapter calls return
//! their traces to the caller, which concatenates them; there is no shared
//! mutable accumulator.

use serde::Serialize;

/// Query-parameter names whose values are replaced before a URL is stored.
const SECRET_PARAMS: &[&str] = &["app_key", "api_key", "key", "token"];

#[derive(Debug, Clone, Serialize)]
pub struct RequestTrace {
    pub source: String,
    pub method: String,
    pub url: String,
    pub note: String,
}

impl RequestTrace {
    /// Records a GET call. The URL is sanitized here, at capture time.
    pub fn get(source: &str, url: &str, note: &str) -> Self {
        Self {
            source: source.to_string(),
            method: "GET".to_string(),
            url: sanitize_url(url),
            note: note.to_string(),
        }
    }
}

/// Replaces the value of every authentication-bearing query parameter with
/// the literal `REDACTED`, preserving all other parameters and the path.
pub fn sanitize_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let sanitized: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if SECRET_PARAMS.contains(&name) => format!("{name}=REDACTED"),
            _ => pair.to_string(),
        })
        .collect();

    format!("{}?{}", base, sanitized.join("&"))
}
