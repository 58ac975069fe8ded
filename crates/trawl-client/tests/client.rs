//! Integration tests for `RateLimitedClient` using wiremock HTTP mocks.

use std::time::Duration;

use trawl_client::{ApiError, AuthorRef, ClientConfig, Endpoint, RateLimitedClient, SearchQuery};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new("test-key");
    config.base_url = base_url.to_owned();
    config.backoff_base_ms = 10;
    config.rate_limit_margin = Duration::from_millis(10);
    config
}

fn test_client(base_url: &str) -> RateLimitedClient {
    RateLimitedClient::new(test_config(base_url)).expect("client construction should not fail")
}

fn tweet(id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({ "id": id, "text": text, "author": { "id": "42", "userName": "skywatcher" } })
}

#[tokio::test]
async fn fetch_sends_api_key_and_latest_query_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twitter/tweet/advanced_search"))
        .and(header("X-API-Key", "test-key"))
        .and(query_param("query", "eclipse2026 lang:en"))
        .and(query_param("queryType", "Latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("1", "first"), tweet("2", "second")],
            "has_next_page": false,
            "next_cursor": ""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let query = SearchQuery::new("eclipse2026").language(Some("en".to_owned()));
    let batch = client.fetch(&query, 10).await.expect("search should succeed");

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.pages_fetched, 1);
    assert_eq!(batch.items[0]["id"], "1");
}

#[tokio::test]
async fn fetch_follows_cursor_and_truncates_to_max_results() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twitter/tweet/advanced_search"))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("3", "c"), tweet("4", "d")],
            "has_next_page": true,
            "next_cursor": "page-3"
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/twitter/tweet/advanced_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("1", "a"), tweet("2", "b")],
            "has_next_page": true,
            "next_cursor": "page-2"
        })))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let batch = client
        .fetch(&SearchQuery::new("eclipse2026"), 3)
        .await
        .expect("search should succeed");

    let ids: Vec<&str> = batch
        .items
        .iter()
        .filter_map(|t| t["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(batch.pages_fetched, 2);
}

#[tokio::test]
async fn response_headers_update_rate_limit_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Rate-Limit-Limit", "60")
                .insert_header("X-Rate-Limit-Remaining", "59")
                .insert_header("X-Rate-Limit-Reset", "4102444800")
                .set_body_json(serde_json::json!({ "tweets": [], "has_next_page": false })),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    client
        .fetch(&SearchQuery::new("aurora"), 5)
        .await
        .expect("search should succeed");

    let state = client
        .rate_limit_state(Endpoint::Search)
        .expect("state recorded");
    assert_eq!(state.limit, Some(60));
    assert_eq!(state.remaining, Some(59));
    assert!(client.rate_limit_state(Endpoint::User).is_none());
}

#[tokio::test]
async fn rate_limited_request_waits_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("9", "after the wait")],
            "has_next_page": false
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.max_retries = 0;
    let client = RateLimitedClient::new(config).unwrap();

    let started = std::time::Instant::now();
    let batch = client
        .fetch(&SearchQuery::new("eclipse2026"), 10)
        .await
        .expect("429 should be waited out even with max_retries = 0");

    assert_eq!(batch.len(), 1);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("1", "ok")],
            "has_next_page": false
        })))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let batch = client
        .fetch(&SearchQuery::new("solar storm"), 5)
        .await
        .expect("should succeed on the third attempt");
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn persistent_server_errors_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch(&SearchQuery::new("solar storm"), 5)
        .await
        .unwrap_err();

    match err {
        ApiError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, ApiError::Server { status: 500, .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch(&SearchQuery::new("eclipse2026"), 5)
        .await
        .unwrap_err();

    match err {
        ApiError::Client { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("expected Client, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_timeouts_exhaust_after_four_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(serde_json::json!({ "tweets": [] })),
        )
        .expect(4)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.timeout = Duration::from_millis(100);
    config.max_retries = 3;
    let client = RateLimitedClient::new(config).unwrap();

    let err = client
        .fetch(&SearchQuery::new("eclipse2026"), 5)
        .await
        .unwrap_err();

    match err {
        ApiError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, ApiError::Timeout { .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn lookup_author_reads_data_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twitter/user/info"))
        .and(query_param("userName", "skywatcher"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {
                "id": "42",
                "userName": "skywatcher",
                "name": "Sky Watcher",
                "followers": 1200,
                "following": 80,
                "isBlueVerified": false
            }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let author = client
        .lookup_author("skywatcher")
        .await
        .expect("lookup should succeed");
    assert_eq!(author.id, "42");
    assert_eq!(author.followers, Some(1200));
}

#[tokio::test]
async fn lookup_item_returns_first_match() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twitter/tweets"))
        .and(query_param("tweet_ids", "77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [tweet("77", "found it")]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let item = client.lookup_item("77").await.unwrap().expect("item present");
    assert_eq!(item["text"], "found it");
}

#[tokio::test]
async fn author_timeline_selects_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twitter/user/last_tweets"))
        .and(query_param("userId", "42"))
        .and(query_param("includeReplies", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "tweets": [tweet("1", "a"), tweet("2", "b")] }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let items = client
        .author_timeline(&AuthorRef::Id("42".to_owned()), false)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
}
