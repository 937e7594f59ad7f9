use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport seam for every upstream call, so wrappers can decorate requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
