//! Wire records for the search API.
//!
//! Search and timeline results stay as raw [`serde_json::Value`]s so that a
//! single malformed item can be rejected on its own during ingestion; callers
//! decode each one with [`ItemRecord::from_value`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Timestamp format for `since:` / `until:` qualifiers.
const QUALIFIER_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S_UTC";

/// An advanced-search query. Qualifiers are appended to the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub language: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl SearchQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Renders the query string sent as the `query` parameter.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut query = self.text.trim().to_owned();
        if let Some(lang) = &self.language {
            query.push_str(" lang:");
            query.push_str(lang);
        }
        if let Some(until) = self.until {
            query.push_str(" until:");
            query.push_str(&until.format(QUALIFIER_TIME_FORMAT).to_string());
        }
        if let Some(since) = self.since {
            query.push_str(" since:");
            query.push_str(&since.format(QUALIFIER_TIME_FORMAT).to_string());
        }
        query
    }
}

/// One page of `tweet/advanced_search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub tweets: Vec<Value>,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Result of [`crate::RateLimitedClient::fetch`], in API response order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<Value>,
    pub pages_fetched: u32,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Selects an author for timeline lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorRef {
    Id(String),
    UserName(String),
}

/// Author object as returned inline with items and by `user/info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRecord {
    pub id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub followers: Option<i64>,
    #[serde(default)]
    pub following: Option<i64>,
    #[serde(default)]
    pub is_blue_verified: bool,
    /// Every other field, kept verbatim as the profile blob.
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// A single item (tweet) from search, lookup or timeline results.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub retweet_count: Option<i64>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub reply_count: Option<i64>,
    #[serde(default)]
    pub quote_count: Option<i64>,
    #[serde(default)]
    pub view_count: Option<i64>,
    #[serde(default, rename = "retweeted_tweet", alias = "retweetedStatus")]
    pub retweeted: Option<Value>,
    #[serde(default, rename = "quoted_tweet", alias = "quotedStatus")]
    pub quoted: Option<Value>,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub is_reply: Option<bool>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub possibly_sensitive: bool,
    #[serde(default)]
    pub author: Option<AuthorRecord>,
}

impl ItemRecord {
    /// Decodes a raw result item.
    ///
    /// # Errors
    ///
    /// Returns the serde error if required fields are missing or mistyped.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        ItemRecord::deserialize(value)
    }

    #[must_use]
    pub fn is_repost(&self) -> bool {
        self.retweeted.as_ref().is_some_and(|v| !v.is_null())
    }

    #[must_use]
    pub fn is_quote(&self) -> bool {
        self.quoted.as_ref().is_some_and(|v| !v.is_null())
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.is_reply.unwrap_or(false)
            || self.in_reply_to_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_string_appends_qualifiers_in_order() {
        let query = SearchQuery {
            text: "eclipse2026".to_owned(),
            language: Some("en".to_owned()),
            since: Some(Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2026, 8, 12, 18, 30, 0).unwrap()),
        };
        assert_eq!(
            query.to_query_string(),
            "eclipse2026 lang:en until:2026-08-12_18:30:00_UTC since:2026-08-01_00:00:00_UTC"
        );
    }

    #[test]
    fn plain_query_has_no_qualifiers() {
        assert_eq!(SearchQuery::new(" solar storm ").to_query_string(), "solar storm");
    }

    #[test]
    fn item_record_maps_flags_and_author() {
        let value = serde_json::json!({
            "id": "1790000000000000001",
            "text": "totality in 4 minutes",
            "createdAt": "Wed Aug 12 18:30:00 +0000 2026",
            "likeCount": 12,
            "viewCount": null,
            "inReplyToId": "1789",
            "quoted_tweet": { "id": "1" },
            "retweeted_tweet": null,
            "lang": "en",
            "author": {
                "id": "42",
                "userName": "skywatcher",
                "name": "Sky Watcher",
                "followers": 1200,
                "following": 80,
                "isBlueVerified": true,
                "location": "Dallas"
            }
        });
        let record = ItemRecord::from_value(&value).expect("valid item");
        assert_eq!(record.like_count, Some(12));
        assert_eq!(record.view_count, None);
        assert!(record.is_reply());
        assert!(record.is_quote());
        assert!(!record.is_repost());

        let author = record.author.expect("author present");
        assert_eq!(author.user_name.as_deref(), Some("skywatcher"));
        assert!(author.is_blue_verified);
        assert_eq!(author.profile.get("location"), Some(&Value::from("Dallas")));
    }

    #[test]
    fn item_without_id_is_rejected() {
        let value = serde_json::json!({ "text": "no id here" });
        assert!(ItemRecord::from_value(&value).is_err());
    }
}
