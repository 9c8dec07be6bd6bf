//! Idempotent schema migrations for the Postgres store.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running schema migrations...");

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            credential_type text PRIMARY KEY,
            access_token text NOT NULL,
            refresh_token text,
            token_type text NOT NULL,
            expires_at timestamptz,
            scope text NOT NULL,
            created_at timestamptz NOT NULL,
            updated_at timestamptz NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS auth_states (
            state text PRIMARY KEY,
            created_at timestamptz NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id uuid PRIMARY KEY,
            name text NOT NULL,
            path text NOT NULL,
            platform text NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now(),
            updated_at timestamptz NOT NULL DEFAULT now(),
            UNIQUE (platform, path)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            external_id text NOT NULL UNIQUE,
            channel_id uuid REFERENCES channels(id),
            title text NOT NULL,
            body text,
            url text NOT NULL,
            permalink text NOT NULL,
            author text NOT NULL,
            upvotes bigint NOT NULL DEFAULT 0,
            downvotes bigint NOT NULL DEFAULT 0,
            score bigint NOT NULL DEFAULT 0,
            comment_count bigint NOT NULL DEFAULT 0,
            created_at_external timestamptz,
            embedding real[],
            record_created_at timestamptz NOT NULL DEFAULT now(),
            record_updated_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_posts_channel ON posts (channel_id)",
        r#"
        CREATE TABLE IF NOT EXISTS search_settings (
            id uuid PRIMARY KEY,
            user_id uuid NOT NULL,
            description text NOT NULL,
            channels_query text NOT NULL,
            retrieval_query text NOT NULL,
            embedding real[],
            created_at timestamptz NOT NULL DEFAULT now(),
            updated_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS analysis_records (
            id uuid PRIMARY KEY,
            user_id uuid NOT NULL,
            post_external_id text NOT NULL,
            channel_id uuid,
            confidence text NOT NULL,
            relation text NOT NULL,
            reason text NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now(),
            UNIQUE (user_id, post_external_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS usage_logs (
            id uuid PRIMARY KEY,
            user_id uuid,
            business text NOT NULL,
            model text NOT NULL,
            prompt_tokens bigint NOT NULL DEFAULT 0,
            completion_tokens bigint NOT NULL DEFAULT 0,
            total_tokens bigint NOT NULL DEFAULT 0,
            cost_usd double precision,
            duration_ms bigint NOT NULL DEFAULT 0,
            success boolean NOT NULL,
            error_message text,
            credit bigint NOT NULL DEFAULT 0,
            created_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_usage_business_user ON usage_logs (business, user_id)",
        r#"
        CREATE TABLE IF NOT EXISTS admin_settings (
            key text PRIMARY KEY,
            value text NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS credit_balances (
            user_id uuid PRIMARY KEY,
            balance bigint NOT NULL DEFAULT 0,
            updated_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS run_locks (
            name text PRIMARY KEY,
            locked_at timestamptz NOT NULL
        )
        "#,
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema migrations complete");
    Ok(())
}
