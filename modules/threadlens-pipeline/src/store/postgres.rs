//! Postgres implementation of the store capability.
//!
//! Plain bound queries throughout; nothing here needs a database at compile
//! time. Conflict-ignore inserts carry the pipeline's idempotence and
//! double-spend guarantees, so the ON CONFLICT clauses are load-bearing.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use threadlens_common::types::{
    AnalysisRecord, AuthState, Channel, Credential, NewPost, UnanalyzedPost, UsageLog,
    TOKEN_CREDIT_MAPPING_KEY,
};

use crate::traits::ContentStore;

/// Authorization states older than this are dead even if still present.
const AUTH_STATE_TTL_MINUTES: i64 = 10;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn credential_from_row(row: &sqlx::postgres::PgRow) -> Result<Credential> {
    Ok(Credential {
        credential_type: row.try_get("credential_type")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        token_type: row.try_get("token_type")?,
        expires_at: row.try_get("expires_at")?,
        scope: row.try_get("scope")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ContentStore for PgStore {
    async fn find_credential(&self, credential_type: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE credential_type = $1")
            .bind(credential_type)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn replace_credential(&self, credential: &Credential) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM credentials WHERE credential_type = $1")
            .bind(&credential.credential_type)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO credentials
                (credential_type, access_token, refresh_token, token_type,
                 expires_at, scope, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&credential.credential_type)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(&credential.token_type)
        .bind(credential.expires_at)
        .bind(&credential.scope)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_credential(&self, credential_type: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE credential_type = $1")
            .bind(credential_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_auth_state(&self, state: &AuthState) -> Result<()> {
        sqlx::query("INSERT INTO auth_states (state, created_at) VALUES ($1, $2)")
            .bind(&state.state)
            .bind(state.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take_auth_state(&self, state: &str) -> Result<Option<AuthState>> {
        let row = sqlx::query("DELETE FROM auth_states WHERE state = $1 RETURNING state, created_at")
            .bind(state)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        if created_at < Utc::now() - Duration::minutes(AUTH_STATE_TTL_MINUTES) {
            return Ok(None); // expired, already deleted
        }
        Ok(Some(AuthState {
            state: row.try_get("state")?,
            created_at,
        }))
    }

    async fn existing_external_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT external_id FROM posts WHERE external_id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok(r.try_get::<String, _>("external_id")?))
            .collect()
    }

    async fn insert_posts_ignore_conflicts(&self, posts: &[NewPost]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT INTO posts
                    (id, external_id, channel_id, title, body, url, permalink, author,
                     upvotes, downvotes, score, comment_count, created_at_external, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (external_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&post.external_id)
            .bind(post.channel_id)
            .bind(&post.title)
            .bind(&post.body)
            .bind(&post.url)
            .bind(&post.permalink)
            .bind(&post.author)
            .bind(post.metrics.upvotes)
            .bind(post.metrics.downvotes)
            .bind(post.metrics.score)
            .bind(post.metrics.comment_count)
            .bind(post.created_at_external)
            .bind(&post.embedding)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn distinct_channels(&self, platform: &str) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (path) id, name, path, platform, created_at, updated_at
            FROM channels
            WHERE platform = $1
            ORDER BY path, created_at
            "#,
        )
        .bind(platform)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Channel {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    path: row.try_get("path")?,
                    platform: row.try_get("platform")?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn find_unanalyzed(&self, user_scope: Option<Uuid>) -> Result<Vec<UnanalyzedPost>> {
        let rows = sqlx::query(
            r#"
            SELECT p.external_id AS post_external_id,
                   p.title,
                   p.body,
                   p.channel_id,
                   c.path AS channel_path,
                   s.user_id,
                   s.retrieval_query
            FROM search_settings s
            JOIN channels c
              ON c.platform = 'reddit'
             AND position(c.path IN s.channels_query) > 0
            JOIN posts p
              ON p.channel_id = c.id
            LEFT JOIN analysis_records a
              ON a.user_id = s.user_id
             AND a.post_external_id = p.external_id
            WHERE a.id IS NULL
              AND p.body IS NOT NULL
              AND length(trim(p.body)) > 0
              AND ($1::uuid IS NULL OR s.user_id = $1)
            ORDER BY p.record_created_at
            "#,
        )
        .bind(user_scope)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UnanalyzedPost {
                    post_external_id: row.try_get("post_external_id")?,
                    title: row.try_get("title")?,
                    body: row.try_get("body")?,
                    channel_id: row.try_get("channel_id")?,
                    channel_path: row.try_get("channel_path")?,
                    user_id: row.try_get("user_id")?,
                    retrieval_query: row.try_get("retrieval_query")?,
                })
            })
            .collect()
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_records
                (id, user_id, post_external_id, channel_id, confidence, relation, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, post_external_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.post_external_id)
        .bind(record.channel_id)
        .bind(&record.confidence)
        .bind(&record.relation)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_usage_log(&self, row: &UsageLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (id, user_id, business, model, prompt_tokens, completion_tokens,
                 total_tokens, cost_usd, duration_ms, success, error_message, credit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.id)
        .bind(row.user_id)
        .bind(&row.business)
        .bind(&row.model)
        .bind(row.prompt_tokens)
        .bind(row.completion_tokens)
        .bind(row.total_tokens)
        .bind(row.cost_usd)
        .bind(row.duration_ms)
        .bind(row.success)
        .bind(&row.error_message)
        .bind(row.credit)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credit_mapping(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT value FROM admin_settings WHERE key = $1")
            .bind(TOKEN_CREDIT_MAPPING_KEY)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let value: String = row.try_get("value")?;
        match value.trim().parse::<i64>() {
            Ok(ratio) if ratio > 0 => Ok(Some(ratio)),
            _ => {
                warn!(value = %value, "Unparseable token_credit_mapping, ignoring");
                Ok(None)
            }
        }
    }

    async fn credit_totals(&self, business: &str) -> Result<Vec<(Option<Uuid>, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, COALESCE(SUM(credit), 0)::bigint AS total
            FROM usage_logs
            WHERE business = $1
            GROUP BY user_id
            "#,
        )
        .bind(business)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("user_id")?, row.try_get("total")?)))
            .collect()
    }

    async fn upsert_credit_balance(&self, user_id: Uuid, total: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_balances (user_id, balance, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id)
            DO UPDATE SET balance = EXCLUDED.balance, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_run_lock(&self, name: &str, stale_after: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_locks (name, locked_at)
            VALUES ($1, now())
            ON CONFLICT (name) DO UPDATE SET locked_at = now()
            WHERE run_locks.locked_at < now() - make_interval(secs => $2)
            "#,
        )
        .bind(name)
        .bind(stale_after.num_seconds() as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_run_lock(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_locks WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
