use serde::{Deserialize, Serialize};

/// Listing sort order. Reddit exposes more (rising, controversial); these are
/// the ones the ingestion pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    New,
    Hot,
    Top,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::New => "new",
            SortMode::Hot => "hot",
            SortMode::Top => "top",
        }
    }
}

/// Response from the token endpoint, for both the code-exchange and the
/// refresh grant. Reddit omits `refresh_token` on refresh responses that
/// keep the old one valid.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds. None means non-expiring.
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// One page of a listing walk: the cursor for the next page plus the posts
/// on this one. `after == None` means the listing is exhausted.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub after: Option<String>,
    pub items: Vec<ThingData>,
}

/// Wire envelope: `{"kind": "Listing", "data": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ListingEnvelope {
    pub kind: String,
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thing {
    pub data: ThingData,
}

/// A link ("t3") as Reddit serializes it. Fields we don't read are dropped
/// at parse time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingData {
    pub id: String,
    /// Fullname, e.g. "t3_abc123" — used as the pagination cursor.
    pub name: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub url: String,
    pub permalink: String,
    pub author: String,
    pub ups: i64,
    pub downs: i64,
    pub score: i64,
    pub num_comments: i64,
    /// Epoch timestamp. Documented as seconds, observed as milliseconds from
    /// some mirrors; consumers must accept both.
    pub created_utc: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_envelope() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_next",
                "children": [
                    {"kind": "t3", "data": {
                        "id": "abc123",
                        "name": "t3_abc123",
                        "subreddit": "rust",
                        "title": "Announcing tokio 2.0",
                        "selftext": "body text",
                        "url": "https://example.com",
                        "permalink": "/r/rust/comments/abc123/",
                        "author": "someone",
                        "ups": 10,
                        "downs": 1,
                        "score": 9,
                        "num_comments": 4,
                        "created_utc": 1700000000.0
                    }}
                ]
            }
        }"#;

        let envelope: ListingEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.kind, "Listing");
        assert_eq!(envelope.data.after.as_deref(), Some("t3_next"));
        assert_eq!(envelope.data.children.len(), 1);

        let thing = &envelope.data.children[0].data;
        assert_eq!(thing.id, "abc123");
        assert_eq!(thing.name, "t3_abc123");
        assert_eq!(thing.num_comments, 4);
        assert_eq!(thing.created_utc, Some(1_700_000_000.0));
    }

    #[test]
    fn parses_listing_with_unknown_fields_and_end_of_listing() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": null,
                "before": null,
                "dist": 0,
                "children": []
            }
        }"#;

        let envelope: ListingEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.after.is_none());
        assert!(envelope.data.children.is_empty());
    }

    #[test]
    fn parses_token_response_without_refresh_token() {
        let raw = r#"{
            "access_token": "tok",
            "token_type": "bearer",
            "expires_in": 3600,
            "scope": "read"
        }"#;

        let token: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.expires_in, Some(3600));
        assert!(token.refresh_token.is_none());
    }
}
