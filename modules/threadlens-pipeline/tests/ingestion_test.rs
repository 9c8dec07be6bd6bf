//! Ingestion pipeline: fetch, dedup, persist, and the containment rules.
//!
//! Paused-clock tests: the fetch jitter and backoff sleeps auto-advance.

use std::sync::Arc;

use reddit_client::RedditError;

use threadlens_common::ThreadlensError;
use threadlens_pipeline::dedup;
use threadlens_pipeline::runner::{run_ingestion, PipelineDeps};
use threadlens_pipeline::testing::*;

fn deps(
    store: Arc<MemoryStore>,
    auth: Arc<StaticAuth>,
    listing: Arc<ScriptedListing>,
    per_channel_limit: u32,
    embed_on_ingest: bool,
    embedder: Arc<FixedEmbedder>,
) -> PipelineDeps {
    PipelineDeps {
        store,
        auth,
        listing,
        generator: Arc::new(ScriptedGenerator::new()),
        embedder,
        redirect_uri: "https://app.example/callback".to_string(),
        per_channel_limit,
        embed_on_ingest,
    }
}

fn simple_deps(store: Arc<MemoryStore>, listing: Arc<ScriptedListing>) -> PipelineDeps {
    deps(
        store,
        Arc::new(StaticAuth::new()),
        listing,
        300,
        false,
        Arc::new(FixedEmbedder::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn ingestion_skips_stored_posts_and_reports_true_insert_count() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch.clone())
            .with_posts(vec![post(&ch, "t3_a1", "Post a1", Some("body"))])
            .with_credential(credential(None, None)),
    );
    let listing = Arc::new(ScriptedListing::new().on_page(
        "example",
        listing_page(
            vec![
                thing("a1", "Post a1", "body"),
                thing("a2", "Post a2", "body"),
                thing("a3", "Post a3", "body"),
            ],
            None,
        ),
    ));

    let stats = run_ingestion(&simple_deps(store.clone(), listing))
        .await
        .unwrap();

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.inserted, 2);
    assert_eq!(store.posts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rerunning_over_an_unchanged_listing_inserts_nothing() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch.clone())
            .with_credential(credential(None, None)),
    );

    let page = || {
        listing_page(
            vec![thing("a1", "One", "body"), thing("a2", "Two", "body")],
            None,
        )
    };

    let first = Arc::new(ScriptedListing::new().on_page("example", page()));
    let stats = run_ingestion(&simple_deps(store.clone(), first))
        .await
        .unwrap();
    assert_eq!(stats.inserted, 2);

    let second = Arc::new(ScriptedListing::new().on_page("example", page()));
    let stats = run_ingestion(&simple_deps(store.clone(), second))
        .await
        .unwrap();
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.duplicates, 2);
    assert_eq!(store.posts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn listing_is_walked_by_cursor_until_exhausted() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch.clone())
            .with_credential(credential(None, None)),
    );

    let first_page: Vec<_> = (0..3).map(|i| thing(&format!("p{i}"), "P", "body")).collect();
    let second_page: Vec<_> = (3..5).map(|i| thing(&format!("p{i}"), "P", "body")).collect();
    let listing = Arc::new(
        ScriptedListing::new()
            .on_page("example", listing_page(first_page, Some("t3_p2")))
            .on_page("example", listing_page(second_page, None)),
    );

    let stats = run_ingestion(&simple_deps(store.clone(), listing.clone()))
        .await
        .unwrap();

    assert_eq!(listing.calls(), 2);
    assert_eq!(stats.fetched, 5);
    assert_eq!(store.posts().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn one_failing_channel_does_not_sink_the_run() {
    let broken = channel("broken");
    let healthy = channel("healthy");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(broken)
            .with_channel(healthy)
            .with_credential(credential(None, None)),
    );
    let listing = Arc::new(
        ScriptedListing::new()
            .on_error(
                "broken",
                RedditError::Api {
                    status: 503,
                    message: "over capacity".to_string(),
                },
            )
            .on_page(
                "healthy",
                listing_page(vec![thing("h1", "H1", "body"), thing("h2", "H2", "body")], None),
            ),
    );

    let stats = run_ingestion(&simple_deps(store.clone(), listing.clone()))
        .await
        .unwrap();

    assert_eq!(listing.calls(), 2); // both channels attempted
    assert_eq!(stats.inserted, 2);
    let ids: Vec<_> = store.posts().iter().map(|p| p.external_id.clone()).collect();
    assert_eq!(ids, vec!["t3_h1", "t3_h2"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_token_is_refreshed_and_the_page_retried_once() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, Some("rt"))),
    );
    let auth = Arc::new(StaticAuth::new());
    let listing = Arc::new(
        ScriptedListing::new()
            .on_error("example", RedditError::Unauthorized)
            .on_page("example", listing_page(vec![thing("a1", "A1", "body")], None)),
    );

    let stats = run_ingestion(&deps(
        store.clone(),
        auth.clone(),
        listing.clone(),
        300,
        false,
        Arc::new(FixedEmbedder::new()),
    ))
    .await
    .unwrap();

    assert_eq!(auth.refresh_calls(), 1);
    assert_eq!(
        listing.tokens_seen(),
        vec!["stored-token".to_string(), "refreshed-token".to_string()]
    );
    assert_eq!(stats.inserted, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_abandons_the_channel_but_not_the_run() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, Some("rt"))),
    );
    let listing = Arc::new(ScriptedListing::new().on_error("example", RedditError::Unauthorized));

    let stats = run_ingestion(&deps(
        store.clone(),
        Arc::new(StaticAuth::failing_refresh()),
        listing,
        300,
        false,
        Arc::new(FixedEmbedder::new()),
    ))
    .await
    .unwrap();

    assert_eq!(stats.inserted, 0);
    assert!(store.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_network_errors_are_retried_on_the_same_page() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, None)),
    );
    let listing = Arc::new(
        ScriptedListing::new()
            .on_error("example", RedditError::Network("connection reset".to_string()))
            .on_page("example", listing_page(vec![thing("a1", "A1", "body")], None)),
    );

    let stats = run_ingestion(&simple_deps(store.clone(), listing.clone()))
        .await
        .unwrap();

    assert_eq!(listing.calls(), 2);
    assert_eq!(stats.inserted, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_run_is_refused_and_the_lock_is_released_after() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, None)),
    );

    // Simulate an in-flight run.
    use threadlens_pipeline::ingest::INGEST_LOCK;
    use threadlens_pipeline::traits::ContentStore;
    assert!(store
        .try_acquire_run_lock(INGEST_LOCK, chrono::Duration::minutes(30))
        .await
        .unwrap());

    let listing = Arc::new(ScriptedListing::new());
    let err = run_ingestion(&simple_deps(store.clone(), listing))
        .await
        .unwrap_err();
    let err = err.downcast::<ThreadlensError>().unwrap();
    assert!(matches!(err, ThreadlensError::RunLockConflict(_)));

    // After the holder finishes, a run goes through and releases the lock.
    store.release_run_lock(INGEST_LOCK).await.unwrap();
    let listing = Arc::new(ScriptedListing::new());
    run_ingestion(&simple_deps(store.clone(), listing))
        .await
        .unwrap();
    assert!(!store.lock_held(INGEST_LOCK));
}

#[tokio::test(start_paused = true)]
async fn failed_bulk_chunk_falls_back_to_per_row_inserts() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, None))
            .with_bulk_insert_failure()
            .with_poison_post("t3_b2"),
    );
    let listing = Arc::new(ScriptedListing::new().on_page(
        "example",
        listing_page(
            vec![
                thing("b1", "B1", "body"),
                thing("b2", "B2", "body"),
                thing("b3", "B3", "body"),
            ],
            None,
        ),
    ));

    let stats = run_ingestion(&simple_deps(store.clone(), listing))
        .await
        .unwrap();

    // The poison row is skipped; its chunk-mates still land.
    assert_eq!(stats.inserted, 2);
    let ids: Vec<_> = store.posts().iter().map(|p| p.external_id.clone()).collect();
    assert_eq!(ids, vec!["t3_b1", "t3_b3"]);
}

#[tokio::test(start_paused = true)]
async fn embed_on_ingest_populates_vectors_and_logs_usage() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, None)),
    );
    let listing = Arc::new(ScriptedListing::new().on_page(
        "example",
        listing_page(vec![thing("a1", "A1", "body"), thing("a2", "A2", "body")], None),
    ));

    let stats = run_ingestion(&deps(
        store.clone(),
        Arc::new(StaticAuth::new()),
        listing,
        300,
        true,
        Arc::new(FixedEmbedder::new()),
    ))
    .await
    .unwrap();

    assert_eq!(stats.inserted, 2);
    assert!(store
        .posts()
        .iter()
        .all(|p| p.embedding.as_ref().map(|e| e.len()) == Some(TEST_EMBEDDING_DIM)));

    let logs = store.usage_logs();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.business == "post_ingest" && l.success));
}

#[tokio::test(start_paused = true)]
async fn failed_embedding_skips_the_post_not_the_chunk() {
    let ch = channel("example");
    let store = Arc::new(
        MemoryStore::new()
            .with_channel(ch)
            .with_credential(credential(None, None)),
    );
    let listing = Arc::new(
        ScriptedListing::new()
            .on_page("example", listing_page(vec![thing("a1", "A1", "body")], None)),
    );

    let stats = run_ingestion(&deps(
        store.clone(),
        Arc::new(StaticAuth::new()),
        listing,
        300,
        true,
        Arc::new(FixedEmbedder::failing()),
    ))
    .await
    .unwrap();

    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.embed_skipped, 1);

    // The failed call is still accounted for.
    let logs = store.usage_logs();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].credit, 0);
}

#[tokio::test]
async fn filter_new_returns_the_set_difference_in_order() {
    let ch = channel("example");
    let store = MemoryStore::new().with_posts(vec![post(&ch, "t3_a2", "stored", Some("b"))]);

    let batch = vec![
        post(&ch, "t3_a1", "one", Some("b")),
        post(&ch, "t3_a2", "two", Some("b")),
        post(&ch, "t3_a3", "three", Some("b")),
    ];

    let fresh = dedup::filter_new(&store, batch).await.unwrap();
    let ids: Vec<_> = fresh.iter().map(|p| p.external_id.as_str()).collect();
    assert_eq!(ids, vec!["t3_a1", "t3_a3"]);
}
