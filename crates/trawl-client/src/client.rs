//! HTTP client for the twitterapi.io REST API.
//!
//! Every request passes through the per-endpoint rate-limit gate and the
//! retry policy in [`crate::retry`]. The client mutates only its own
//! rate-limit state.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use trawl_core::AppConfig;

use crate::error::ApiError;
use crate::rate_limit::{Endpoint, RateLimitState, RateLimiter};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{AuthorRecord, AuthorRef, Batch, SearchPage, SearchQuery};

const DEFAULT_BASE_URL: &str = "https://api.twitterapi.io";
const API_KEY_HEADER: &str = "X-API-Key";
const USER_AGENT: &str = "trawl/0.1 (topic-collector)";

/// Fallback when a 429 carries no parseable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Guards against cursors that cycle forever.
const MAX_PAGES: u32 = 50;

const MAX_ERROR_BODY_CHARS: usize = 200;

const SEARCH_PATH: &str = "twitter/tweet/advanced_search";
const USER_INFO_PATH: &str = "twitter/user/info";
const TWEETS_PATH: &str = "twitter/tweets";
const TIMELINE_PATH: &str = "twitter/user/last_tweets";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Additional attempts after the first for timeouts and 5xx.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Extra wait added after a rate-limit reset instant.
    pub rate_limit_margin: Duration,
    pub max_rate_limit_waits: u32,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base_ms: 1_000,
            rate_limit_margin: Duration::from_secs(1),
            max_rate_limit_waits: 5,
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.api_base_url.clone(),
            timeout: Duration::from_secs(config.api_timeout_secs),
            max_retries: config.api_max_retries,
            backoff_base_ms: config.api_backoff_base_ms,
            rate_limit_margin: Duration::from_millis(config.api_rate_limit_margin_ms),
            max_rate_limit_waits: config.api_max_rate_limit_waits,
        }
    }
}

/// Client for the search API with rate-limit gating and bounded retries.
pub struct RateLimitedClient {
    http: Client,
    api_key: String,
    base_url: Url,
    limiter: RateLimiter,
    policy: RetryPolicy,
    cancel: Option<watch::Receiver<bool>>,
}

impl RateLimitedClient {
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the `reqwest::Client` cannot be
    /// built, or [`ApiError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        // Exactly one trailing slash, so joins append to the base path.
        let normalised = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("'{}': {e}", config.base_url)))?;

        Ok(Self {
            http,
            api_key: config.api_key,
            base_url,
            limiter: RateLimiter::new(config.rate_limit_margin),
            policy: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base_ms: config.backoff_base_ms,
                max_rate_limit_waits: config.max_rate_limit_waits,
            },
            cancel: None,
        })
    }

    /// Makes rate-limit and back-off waits return [`ApiError::Cancelled`]
    /// once `stop` becomes `true`.
    #[must_use]
    pub fn with_cancellation(mut self, stop: watch::Receiver<bool>) -> Self {
        self.cancel = Some(stop);
        self
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn rate_limit_state(&self, endpoint: Endpoint) -> Option<RateLimitState> {
        self.limiter.state(endpoint)
    }

    /// Runs an advanced search, following cursors until `max_results` items
    /// are gathered or the API reports no further page.
    ///
    /// Never returns more than `max_results` items.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from a page request; items gathered from earlier
    /// pages are discarded.
    pub async fn fetch(&self, query: &SearchQuery, max_results: u32) -> Result<Batch, ApiError> {
        let limit = usize::try_from(max_results).unwrap_or(usize::MAX);
        let mut batch = Batch::default();
        if limit == 0 {
            return Ok(batch);
        }

        let query_string = query.to_query_string();
        tracing::info!(query = %query_string, max_results, "client: searching");

        let mut cursor: Option<String> = None;
        loop {
            if batch.pages_fetched >= MAX_PAGES {
                tracing::warn!(
                    query = %query_string,
                    pages = batch.pages_fetched,
                    "client: page cap reached, stopping pagination"
                );
                break;
            }

            let mut params = vec![("query", query_string.as_str()), ("queryType", "Latest")];
            if let Some(c) = cursor.as_deref() {
                params.push(("cursor", c));
            }
            let url = self.build_url(SEARCH_PATH, &params);

            let body = self.get_json(Endpoint::Search, &url).await?;
            let page = SearchPage::deserialize(&body).map_err(|e| ApiError::Deserialize {
                context: format!("advanced_search(query={query_string})"),
                source: e,
            })?;
            batch.pages_fetched += 1;

            let page_len = page.tweets.len();
            let room = limit - batch.items.len();
            batch.items.extend(page.tweets.into_iter().take(room));

            if batch.items.len() >= limit || !page.has_next_page || page_len == 0 {
                break;
            }
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(batch)
    }

    /// Looks up a single author profile by user name.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request, or [`ApiError::Deserialize`] if the
    /// profile is malformed.
    pub async fn lookup_author(&self, user_name: &str) -> Result<AuthorRecord, ApiError> {
        let url = self.build_url(USER_INFO_PATH, &[("userName", user_name)]);
        let body = self.get_json(Endpoint::User, &url).await?;
        let profile = body.get("data").filter(|d| d.is_object()).unwrap_or(&body);
        AuthorRecord::deserialize(profile).map_err(|e| ApiError::Deserialize {
            context: format!("user/info(userName={user_name})"),
            source: e,
        })
    }

    /// Looks up one item by id. `None` if the API returns no match.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn lookup_item(&self, id: &str) -> Result<Option<Value>, ApiError> {
        let url = self.build_url(TWEETS_PATH, &[("tweet_ids", id)]);
        let body = self.get_json(Endpoint::Tweets, &url).await?;
        Ok(extract_tweets(&body).into_iter().next())
    }

    /// Returns an author's most recent items.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn author_timeline(
        &self,
        author: &AuthorRef,
        include_replies: bool,
    ) -> Result<Vec<Value>, ApiError> {
        let include = if include_replies { "true" } else { "false" };
        let selector = match author {
            AuthorRef::Id(id) => ("userId", id.as_str()),
            AuthorRef::UserName(name) => ("userName", name.as_str()),
        };
        let url = self.build_url(TIMELINE_PATH, &[selector, ("includeReplies", include)]);
        let body = self.get_json(Endpoint::User, &url).await?;
        Ok(extract_tweets(&body))
    }

    fn build_url(&self, path: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{}{path}", self.base_url.path()));
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    async fn get_json(&self, endpoint: Endpoint, url: &Url) -> Result<Value, ApiError> {
        retry_with_backoff(&self.policy, endpoint, self.cancel.as_ref(), || {
            self.send_once(endpoint, url)
        })
        .await
    }

    /// One gated attempt. Non-2xx statuses become typed errors for the
    /// retry policy to classify.
    async fn send_once(&self, endpoint: Endpoint, url: &Url) -> Result<Value, ApiError> {
        self.limiter
            .wait_for_capacity(endpoint, self.cancel.as_ref())
            .await?;

        let response = self
            .http
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(e, endpoint))?;

        self.limiter.record(endpoint, response.headers());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited {
                endpoint: endpoint.to_string(),
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Client {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, endpoint))?;
        serde_json::from_str(&body).map_err(|e| ApiError::Deserialize {
            context: format!("{endpoint} {}", url.path()),
            source: e,
        })
    }
}

fn transport_error(err: reqwest::Error, endpoint: Endpoint) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        ApiError::Transport(err)
    }
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Items live under `tweets` or `data.tweets` depending on the endpoint.
fn extract_tweets(body: &Value) -> Vec<Value> {
    body.get("data")
        .and_then(|d| d.get("tweets"))
        .or_else(|| body.get("tweets"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
