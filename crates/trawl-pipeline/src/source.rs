use async_trait::async_trait;
use trawl_client::{ApiError, Batch, RateLimitedClient, SearchQuery};

/// Where collection cycles pull raw items from.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Returns at most `max_results` raw items matching `query`.
    async fn fetch(&self, query: &SearchQuery, max_results: u32) -> Result<Batch, ApiError>;
}

#[async_trait]
impl SearchSource for RateLimitedClient {
    async fn fetch(&self, query: &SearchQuery, max_results: u32) -> Result<Batch, ApiError> {
        RateLimitedClient::fetch(self, query, max_results).await
    }
}
