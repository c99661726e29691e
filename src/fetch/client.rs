use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam over HTTP execution so credential decorators can wrap the base
/// client and tests can substitute canned responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
