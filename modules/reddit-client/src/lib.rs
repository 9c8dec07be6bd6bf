pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{ListingPage, SortMode, ThingData, TokenResponse};

use std::time::Duration;

use types::ListingEnvelope;

const AUTH_BASE_URL: &str = "https://www.reddit.com";
const API_BASE_URL: &str = "https://oauth.reddit.com";

/// Maximum items Reddit returns per listing page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// HTTP client for Reddit's OAuth2 token endpoints and listing API.
///
/// Holds app credentials only; access tokens are passed per call so the
/// token lifecycle stays with the caller.
pub struct RedditClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_base_url: String,
    api_base_url: String,
}

impl RedditClient {
    pub fn new(client_id: String, client_secret: String, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            client_id,
            client_secret,
            auth_base_url: AUTH_BASE_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
        }
    }

    pub fn with_auth_base_url(mut self, url: &str) -> Self {
        self.auth_base_url = url.to_string();
        self
    }

    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.to_string();
        self
    }

    /// Build the authorization URL the user must visit to grant access.
    /// `duration=permanent` requests a refresh token.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str, scopes: &[&str]) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("duration", "permanent")
            .append_pair("scope", &scopes.join(" "))
            .finish();
        format!("{}/api/v1/authorize?{}", self.auth_base_url, query)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.token_request(&params).await
    }

    /// Trade a refresh token for a fresh access token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/api/v1/access_token", self.auth_base_url);

        tracing::debug!(grant_type = params[0].1, "Reddit token request");

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(params)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.is_empty() {
            return Err(RedditError::Parse("empty token response body".to_string()));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch one page of a subreddit listing. `after` is the fullname cursor
    /// from the previous page; `limit` is clamped to Reddit's page maximum.
    pub async fn listing_page(
        &self,
        access_token: &str,
        subreddit: &str,
        sort: SortMode,
        after: Option<&str>,
        limit: u32,
    ) -> Result<ListingPage> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let mut url = format!(
            "{}/r/{}/{}?limit={}&raw_json=1",
            self.api_base_url,
            subreddit,
            sort.as_str(),
            limit
        );
        if let Some(cursor) = after {
            url.push_str("&after=");
            url.push_str(cursor);
        }

        tracing::debug!(subreddit, sort = sort.as_str(), after, "Reddit listing request");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(RedditError::Unauthorized);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.is_empty() {
            return Err(RedditError::Parse("empty listing body".to_string()));
        }

        let envelope: ListingEnvelope = serde_json::from_str(&body)?;
        if envelope.kind != "Listing" {
            return Err(RedditError::Parse(format!(
                "expected a Listing envelope, got kind '{}'",
                envelope.kind
            )));
        }

        Ok(ListingPage {
            after: envelope.data.after,
            items: envelope.data.children.into_iter().map(|c| c.data).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_app_and_state() {
        let client = RedditClient::new("app-id".into(), "app-secret".into(), "test-agent/1.0");
        let url = client.authorize_url("https://example.com/callback", "csrf-123", &["read"]);

        assert!(url.starts_with("https://www.reddit.com/api/v1/authorize?"));
        assert!(url.contains("client_id=app-id"));
        assert!(url.contains("state=csrf-123"));
        assert!(url.contains("duration=permanent"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fcallback"));
        assert!(!url.contains("app-secret"));
    }

    #[test]
    fn authorize_url_joins_scopes_with_spaces() {
        let client = RedditClient::new("id".into(), "secret".into(), "test-agent/1.0");
        let url = client.authorize_url("https://example.com/cb", "s", &["read", "identity"]);
        assert!(url.contains("scope=read+identity") || url.contains("scope=read%20identity"));
    }
}
