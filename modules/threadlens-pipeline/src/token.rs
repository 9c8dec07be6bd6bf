//! OAuth2 credential lifecycle for the content platform.
//!
//! One logical credential per integration type. Refreshes replace the stored
//! row wholesale and are serialized through an in-instance mutex so two
//! callers cannot race the (single-use) refresh token.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use reddit_client::TokenResponse;
use threadlens_common::types::{AuthState, Credential, CREDENTIAL_TYPE_REDDIT};
use threadlens_common::ThreadlensError;

use crate::traits::{ContentStore, PlatformAuth};

/// A generated authorization URL and its CSRF state. The state is persisted
/// before this is returned; the callback handler validates it out-of-band.
#[derive(Debug, Clone)]
pub struct AuthUrl {
    pub url: String,
    pub state: String,
}

pub struct TokenManager {
    store: Arc<dyn ContentStore>,
    auth: Arc<dyn PlatformAuth>,
    redirect_uri: String,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn ContentStore>,
        auth: Arc<dyn PlatformAuth>,
        redirect_uri: String,
    ) -> Self {
        Self {
            store,
            auth,
            redirect_uri,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Generate an authorization URL, persisting its CSRF state.
    pub async fn authorization_url(&self) -> Result<AuthUrl> {
        let state = Uuid::new_v4().simple().to_string();
        self.store
            .put_auth_state(&AuthState {
                state: state.clone(),
                created_at: Utc::now(),
            })
            .await
            .context("failed to persist authorization state")?;

        let url = self.auth.authorize_url(&self.redirect_uri, &state);
        Ok(AuthUrl { url, state })
    }

    /// Exchange an authorization code for tokens and persist the credential,
    /// replacing any prior one of the same type. State verification happens
    /// in the callback handler before this is called.
    pub async fn complete_authorization(&self, code: &str) -> Result<Credential> {
        let token = self
            .auth
            .exchange_code(code, &self.redirect_uri)
            .await
            .map_err(|e| anyhow::anyhow!("code exchange failed: {e}"))?;

        let credential = credential_from_token(token, None);
        self.store
            .replace_credential(&credential)
            .await
            .context("failed to persist credential")?;

        info!(
            credential_type = CREDENTIAL_TYPE_REDDIT,
            expires_at = ?credential.expires_at,
            "Authorization completed"
        );
        Ok(credential)
    }

    /// Remove the stored credential.
    pub async fn disconnect(&self) -> Result<()> {
        self.store.delete_credential(CREDENTIAL_TYPE_REDDIT).await
    }

    /// Return a currently valid access token, refreshing transparently when
    /// the stored one has expired.
    pub async fn valid_access_token(&self) -> std::result::Result<String, ThreadlensError> {
        let credential = self
            .store
            .find_credential(CREDENTIAL_TYPE_REDDIT)
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;

        let credential = match credential {
            Some(c) => c,
            None => return Err(self.auth_required().await),
        };

        if !is_expired(&credential) {
            return Ok(credential.access_token);
        }

        self.refresh(&credential.access_token).await
    }

    /// Replace a stale access token, whether it expired locally or the
    /// platform rejected it. Serialized: a caller that lost the race to a
    /// concurrent refresh reuses its result instead of spending the
    /// (single-use) refresh token again.
    pub async fn refresh(&self, stale_token: &str) -> std::result::Result<String, ThreadlensError> {
        let _guard = self.refresh_lock.lock().await;

        // Re-read under the lock: a contending caller may have refreshed
        // while we waited.
        let credential = self
            .store
            .find_credential(CREDENTIAL_TYPE_REDDIT)
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;

        let credential = match credential {
            Some(c) => c,
            None => return Err(self.auth_required().await),
        };

        if credential.access_token != stale_token {
            return Ok(credential.access_token);
        }

        let refresh_token = match credential.refresh_token.clone() {
            Some(t) => t,
            None => {
                warn!("Credential expired and no refresh token stored");
                return Err(self.auth_required().await);
            }
        };

        let token = self
            .auth
            .refresh_access_token(&refresh_token)
            .await
            .map_err(|e| ThreadlensError::Network(format!("token refresh failed: {e}")))?;

        // Some providers omit the refresh token on refresh; keep the old one.
        let refreshed = credential_from_token(token, Some(refresh_token));
        self.store
            .replace_credential(&refreshed)
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;

        info!(expires_at = ?refreshed.expires_at, "Access token refreshed");
        Ok(refreshed.access_token)
    }

    async fn auth_required(&self) -> ThreadlensError {
        match self.authorization_url().await {
            Ok(auth_url) => ThreadlensError::AuthRequired {
                authorize_url: auth_url.url,
            },
            Err(e) => ThreadlensError::Database(format!(
                "no credential and failed to generate authorization URL: {e}"
            )),
        }
    }
}

fn is_expired(credential: &Credential) -> bool {
    // A credential without an expiry never expires.
    credential
        .expires_at
        .map(|t| t <= Utc::now())
        .unwrap_or(false)
}

fn credential_from_token(token: TokenResponse, previous_refresh: Option<String>) -> Credential {
    let now = Utc::now();
    Credential {
        credential_type: CREDENTIAL_TYPE_REDDIT.to_string(),
        access_token: token.access_token,
        refresh_token: token.refresh_token.or(previous_refresh),
        token_type: token.token_type,
        expires_at: token.expires_in.map(|secs| now + Duration::seconds(secs)),
        scope: token.scope,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(refresh: Option<&str>, expires_in: Option<i64>) -> TokenResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "tok",
            "token_type": "bearer",
            "expires_in": expires_in,
            "refresh_token": refresh,
            "scope": "read"
        }))
        .unwrap()
    }

    #[test]
    fn credential_keeps_previous_refresh_token_when_response_omits_it() {
        let credential = credential_from_token(token(None, Some(3600)), Some("old-rt".into()));
        assert_eq!(credential.refresh_token.as_deref(), Some("old-rt"));
        assert!(credential.expires_at.is_some());
    }

    #[test]
    fn credential_prefers_fresh_refresh_token() {
        let credential = credential_from_token(token(Some("new-rt"), Some(3600)), Some("old".into()));
        assert_eq!(credential.refresh_token.as_deref(), Some("new-rt"));
    }

    #[test]
    fn missing_expiry_means_non_expiring() {
        let credential = credential_from_token(token(None, None), None);
        assert!(credential.expires_at.is_none());
        assert!(!is_expired(&credential));
    }

    #[test]
    fn past_expiry_is_expired() {
        let mut credential = credential_from_token(token(None, Some(3600)), None);
        credential.expires_at = Some(Utc::now() - Duration::minutes(5));
        assert!(is_expired(&credential));
    }
}
