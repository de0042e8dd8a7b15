use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport seam for everything that talks HTTP.
///
/// Production code uses [`BasicClient`](super::BasicClient); wrappers can
/// decorate requests before handing them to an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
