//! Live tests for trawl-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database. The migrations
//! path is relative to `crates/trawl-db/`.

use chrono::Utc;
use trawl_core::{FilterOutcome, ProcessingStatus, RejectReason, TopicConfig, TriggerSource};
use trawl_db::{
    complete_collection_run, create_collection_run, fail_collection_run, get_collection_run,
    get_item, get_item_by_external_id, get_topic_by_text, insert_item, insert_topic,
    link_item_to_topic, list_active_topics, list_collection_run_topics, list_items_by_status,
    list_topic_ids_for_item, seed_topics, set_item_status, set_item_statuses, set_topic_active,
    start_collection_run, touch_topic_last_run, update_item_engagement, upsert_author,
    upsert_collection_run_topic, DbError, Engagement, NewAuthor, NewItem,
};

fn new_item(external_id: &str, author_id: Option<i64>) -> NewItem {
    NewItem {
        external_id: external_id.to_string(),
        author_id,
        body: "path of totality crosses Mazatlan".to_string(),
        created_at: Utc::now(),
        engagement: Engagement {
            retweets: 1,
            likes: 2,
            replies: 0,
            quotes: 0,
            views: 10,
        },
        is_repost: false,
        is_reply: false,
        is_quote: false,
        language: Some("en".to_string()),
        possibly_sensitive: false,
        raw: serde_json::json!({ "id": external_id }),
    }
}

fn new_author(external_id: &str, followers: i64) -> NewAuthor {
    NewAuthor {
        external_id: external_id.to_string(),
        user_name: Some("skywatcher".to_string()),
        display_name: Some("Sky Watcher".to_string()),
        followers_count: followers,
        following_count: 12,
        is_verified: false,
        profile: serde_json::json!({ "location": "Dallas" }),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn active_topics_order_by_priority_then_last_run(pool: sqlx::PgPool) {
    let low = insert_topic(&pool, "aurora", 1, 10, None).await.unwrap();
    let ran = insert_topic(&pool, "eclipse2026", 9, 10, None).await.unwrap();
    let fresh = insert_topic(&pool, "solar storm", 9, 10, None).await.unwrap();
    insert_topic(&pool, "meteor", 5, 10, None).await.unwrap();
    set_topic_active(&pool, "meteor", false).await.unwrap();
    touch_topic_last_run(&pool, ran.id).await.unwrap();

    let ids: Vec<i64> = list_active_topics(&pool)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![fresh.id, ran.id, low.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_topic_text_is_conflict(pool: sqlx::PgPool) {
    insert_topic(&pool, "eclipse2026", 5, 10, None).await.unwrap();
    let err = insert_topic(&pool, "eclipse2026", 5, 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)), "got {err:?}");
}

#[sqlx::test(migrations = "../../migrations")]
async fn seed_topics_upserts_by_text(pool: sqlx::PgPool) {
    let mut topics = vec![TopicConfig {
        text: "eclipse2026".to_string(),
        active: true,
        priority: 5,
        daily_quota: 10,
        category: None,
    }];
    assert_eq!(seed_topics(&pool, &topics).await.unwrap(), 1);

    topics[0].daily_quota = 50;
    seed_topics(&pool, &topics).await.unwrap();

    let topic = get_topic_by_text(&pool, "eclipse2026")
        .await
        .unwrap()
        .expect("topic should exist");
    assert_eq!(topic.daily_quota, 50);
}

#[sqlx::test(migrations = "../../migrations")]
async fn author_upsert_updates_counters_only(pool: sqlx::PgPool) {
    let first = upsert_author(&pool, &new_author("42", 100)).await.unwrap();
    let mut again = new_author("42", 150);
    again.display_name = Some("Renamed".to_string());
    let second = upsert_author(&pool, &again).await.unwrap();
    assert_eq!(first, second);

    let row = trawl_db::get_author_by_external_id(&pool, "42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.followers_count, 150);
    assert_eq!(row.display_name.as_deref(), Some("Sky Watcher"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_item_insert_is_conflict(pool: sqlx::PgPool) {
    insert_item(&pool, &new_item("1001", None)).await.unwrap();
    let err = insert_item(&pool, &new_item("1001", None))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)), "got {err:?}");
}

#[sqlx::test(migrations = "../../migrations")]
async fn new_items_start_collected_and_pending(pool: sqlx::PgPool) {
    let author_id = upsert_author(&pool, &new_author("7", 1)).await.unwrap();
    let item = insert_item(&pool, &new_item("1002", Some(author_id)))
        .await
        .unwrap();
    assert_eq!(item.status().unwrap(), ProcessingStatus::Collected);
    assert_eq!(item.outcome().unwrap(), FilterOutcome::Pending);
    assert_eq!(item.author_id, Some(author_id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn engagement_update_overwrites_counters(pool: sqlx::PgPool) {
    let item = insert_item(&pool, &new_item("1003", None)).await.unwrap();
    let engagement = Engagement {
        retweets: 5,
        likes: 50,
        replies: 3,
        quotes: 1,
        views: 900,
    };
    update_item_engagement(&pool, item.id, &engagement)
        .await
        .unwrap();

    let row = get_item_by_external_id(&pool, "1003").await.unwrap().unwrap();
    assert_eq!(row.like_count, 50);
    assert_eq!(row.view_count, 900);

    let missing = update_item_engagement(&pool, item.id + 1000, &engagement).await;
    assert!(matches!(missing, Err(DbError::NotFound)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn relinking_item_is_a_no_op(pool: sqlx::PgPool) {
    let topic = insert_topic(&pool, "eclipse2026", 5, 10, None).await.unwrap();
    let item = insert_item(&pool, &new_item("1004", None)).await.unwrap();

    assert!(link_item_to_topic(&pool, topic.id, item.id, 1.0).await.unwrap());
    assert!(!link_item_to_topic(&pool, topic.id, item.id, 1.0).await.unwrap());
    assert_eq!(
        list_topic_ids_for_item(&pool, item.id).await.unwrap(),
        vec![topic.id]
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn status_only_advances_from_collected(pool: sqlx::PgPool) {
    let item = insert_item(&pool, &new_item("1005", None)).await.unwrap();

    let changed = set_item_status(
        &pool,
        item.id,
        ProcessingStatus::Accepted,
        FilterOutcome::Accepted,
    )
    .await
    .unwrap();
    assert!(changed);

    let again = set_item_status(
        &pool,
        item.id,
        ProcessingStatus::Rejected(RejectReason::Spam),
        FilterOutcome::Rejected,
    )
    .await
    .unwrap();
    assert!(!again);

    let row = get_item(&pool, item.id).await.unwrap().unwrap();
    assert_eq!(row.status().unwrap(), ProcessingStatus::Accepted);
}

#[sqlx::test(migrations = "../../migrations")]
async fn batch_status_update_skips_terminal_items(pool: sqlx::PgPool) {
    let a = insert_item(&pool, &new_item("2001", None)).await.unwrap();
    let b = insert_item(&pool, &new_item("2002", None)).await.unwrap();
    set_item_status(&pool, b.id, ProcessingStatus::Accepted, FilterOutcome::Accepted)
        .await
        .unwrap();

    let changed = set_item_statuses(
        &pool,
        &[
            (
                a.id,
                ProcessingStatus::Rejected(RejectReason::LowQuality),
                FilterOutcome::Rejected,
            ),
            (
                b.id,
                ProcessingStatus::Rejected(RejectReason::Spam),
                FilterOutcome::Rejected,
            ),
        ],
    )
    .await
    .unwrap();
    assert_eq!(changed, vec![a.id]);

    let pending = list_items_by_status(&pool, ProcessingStatus::Collected, 10)
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn collection_run_lifecycle_records_topic_results(pool: sqlx::PgPool) {
    let topic = insert_topic(&pool, "eclipse2026", 5, 10, None).await.unwrap();
    let run = create_collection_run(&pool, TriggerSource::Api).await.unwrap();
    assert_eq!(run.status, "queued");
    assert_eq!(run.trigger_source, "api");

    start_collection_run(&pool, run.id).await.unwrap();
    upsert_collection_run_topic(&pool, run.id, topic.id, "succeeded", 3, None)
        .await
        .unwrap();
    complete_collection_run(&pool, run.id, 3).await.unwrap();

    let row = get_collection_run(&pool, run.id).await.unwrap();
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.records_processed, 3);
    assert!(row.completed_at.is_some());

    let topics = list_collection_run_topics(&pool, run.id).await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].records_processed, 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn collection_run_cannot_fail_from_queued(pool: sqlx::PgPool) {
    let run = create_collection_run(&pool, TriggerSource::Timer).await.unwrap();
    let err = fail_collection_run(&pool, run.id, "boom").await.unwrap_err();
    assert!(matches!(
        err,
        DbError::InvalidCollectionRunTransition {
            expected_status: "running",
            ..
        }
    ));
}
