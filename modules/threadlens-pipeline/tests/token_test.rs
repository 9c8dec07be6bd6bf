//! Token lifecycle: transparent refresh, replacement persistence, and the
//! authorization-required surface.

use std::sync::Arc;

use chrono::{Duration, Utc};

use threadlens_common::ThreadlensError;
use threadlens_pipeline::testing::*;
use threadlens_pipeline::token::TokenManager;

fn manager(store: Arc<MemoryStore>, auth: Arc<StaticAuth>) -> TokenManager {
    TokenManager::new(store, auth, "https://app.example/callback".to_string())
}

#[tokio::test]
async fn unexpired_token_is_returned_without_refresh() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(
        Some(Utc::now() + Duration::hours(1)),
        Some("rt"),
    )));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store, auth.clone());

    let token = tokens.valid_access_token().await.unwrap();
    assert_eq!(token, "stored-token");
    assert_eq!(auth.refresh_calls(), 0);
}

#[tokio::test]
async fn missing_expiry_counts_as_non_expiring() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(None, None)));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store, auth.clone());

    assert_eq!(tokens.valid_access_token().await.unwrap(), "stored-token");
    assert_eq!(auth.refresh_calls(), 0);
}

#[tokio::test]
async fn expired_token_refreshes_and_persists_replacement() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(
        Some(Utc::now() - Duration::minutes(5)),
        Some("rt"),
    )));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store.clone(), auth.clone());

    let token = tokens.valid_access_token().await.unwrap();
    assert_eq!(token, "refreshed-token");
    assert_eq!(auth.refresh_calls(), 1);

    let stored = store.stored_credential().unwrap();
    assert_eq!(stored.access_token, "refreshed-token");
    // StaticAuth omits the refresh token on refresh; the old one is kept.
    assert_eq!(stored.refresh_token.as_deref(), Some("rt"));
    assert!(stored.expires_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn expired_without_refresh_token_requires_authorization() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(
        Some(Utc::now() - Duration::minutes(5)),
        None,
    )));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store.clone(), auth);

    let err = tokens.valid_access_token().await.unwrap_err();
    let ThreadlensError::AuthRequired { authorize_url } = err else {
        panic!("expected AuthRequired, got {err}");
    };

    // The CSRF state in the URL must have been persisted for the callback.
    let state = authorize_url.rsplit("state=").next().unwrap();
    assert!(store.has_auth_state(state));
}

#[tokio::test]
async fn missing_credential_requires_authorization() {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store, auth.clone());

    let err = tokens.valid_access_token().await.unwrap_err();
    assert!(matches!(err, ThreadlensError::AuthRequired { .. }));
    assert_eq!(auth.refresh_calls(), 0);
}

#[tokio::test]
async fn failed_refresh_propagates_without_stale_fallback() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(
        Some(Utc::now() - Duration::minutes(5)),
        Some("rt"),
    )));
    let auth = Arc::new(StaticAuth::failing_refresh());
    let tokens = manager(store.clone(), auth);

    let err = tokens.valid_access_token().await.unwrap_err();
    assert!(matches!(err, ThreadlensError::Network(_)));
    // The stale credential is left untouched.
    assert_eq!(store.stored_credential().unwrap().access_token, "stored-token");
}

#[tokio::test]
async fn refresh_of_an_already_replaced_token_reuses_the_replacement() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(
        Some(Utc::now() + Duration::hours(1)),
        Some("rt"),
    )));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store, auth.clone());

    // A caller reporting a token that is no longer the stored one gets the
    // stored one back without a second refresh spend.
    let token = tokens.refresh("some-older-token").await.unwrap();
    assert_eq!(token, "stored-token");
    assert_eq!(auth.refresh_calls(), 0);
}

#[tokio::test]
async fn complete_authorization_persists_exchanged_credential() {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store.clone(), auth.clone());

    let credential = tokens.complete_authorization("the-code").await.unwrap();
    assert_eq!(credential.access_token, "exchanged-token");
    assert_eq!(auth.exchange_calls(), 1);

    let stored = store.stored_credential().unwrap();
    assert_eq!(stored.access_token, "exchanged-token");
    assert_eq!(stored.refresh_token.as_deref(), Some("exchanged-refresh"));
}

#[tokio::test]
async fn authorization_state_is_single_use() {
    use threadlens_pipeline::traits::ContentStore;

    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store.clone(), auth);

    let auth_url = tokens.authorization_url().await.unwrap();
    assert!(auth_url.url.contains(&auth_url.state));

    // The callback handler consumes the state exactly once.
    let taken = store.take_auth_state(&auth_url.state).await.unwrap();
    assert!(taken.is_some());
    let again = store.take_auth_state(&auth_url.state).await.unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn disconnect_deletes_the_credential() {
    let store = Arc::new(MemoryStore::new().with_credential(credential(None, None)));
    let auth = Arc::new(StaticAuth::new());
    let tokens = manager(store.clone(), auth);

    tokens.disconnect().await.unwrap();
    assert!(store.stored_credential().is_none());
}
