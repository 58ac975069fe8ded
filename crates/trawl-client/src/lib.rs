//! Rate-limited client for the twitterapi.io search API.

mod client;
mod error;
mod rate_limit;
mod retry;
mod types;

pub use client::{ClientConfig, RateLimitedClient};
pub use error::ApiError;
pub use rate_limit::{Endpoint, RateLimitState, RateLimiter};
pub use types::{AuthorRecord, AuthorRef, Batch, ItemRecord, SearchPage, SearchQuery};
