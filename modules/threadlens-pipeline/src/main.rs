use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reddit_client::RedditClient;
use threadlens_common::Config;
use threadlens_pipeline::providers::{ChatProvider, EmbeddingProvider};
use threadlens_pipeline::runner::{run_analysis, run_ingestion, PipelineDeps};
use threadlens_pipeline::store::{migrate::migrate, PgStore};
use threadlens_pipeline::token::TokenManager;

#[derive(Parser)]
#[command(name = "threadlens", about = "Content ingestion and analysis pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run schema migrations and exit.
    Migrate,
    /// Print the OAuth authorization URL for connecting the platform account.
    AuthUrl,
    /// Run one ingestion cycle over all configured channels.
    Ingest,
    /// Run one analysis cycle over all unanalyzed posts.
    Analyze,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadlens=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env();
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);

    // Idempotent; every entrypoint can assume the schema exists.
    migrate(store.pool()).await?;

    match cli.command {
        Command::Migrate => {
            info!("Migrations complete");
        }
        Command::AuthUrl => {
            let reddit = Arc::new(reddit_client_from(&config));
            let tokens = TokenManager::new(
                store.clone(),
                reddit,
                config.reddit_redirect_uri.clone(),
            );
            let auth_url = tokens.authorization_url().await?;
            println!("{}", auth_url.url);
        }
        Command::Ingest => {
            let deps = build_deps(store, &config);
            let stats = run_ingestion(&deps).await?;
            println!("{stats}");
        }
        Command::Analyze => {
            let deps = build_deps(store, &config);
            let stats = run_analysis(&deps).await?;
            println!("{stats}");
        }
    }

    Ok(())
}

fn reddit_client_from(config: &Config) -> RedditClient {
    RedditClient::new(
        config.reddit_client_id.clone(),
        config.reddit_client_secret.clone(),
        &config.reddit_user_agent,
    )
}

fn build_deps(store: Arc<PgStore>, config: &Config) -> PipelineDeps {
    let reddit = Arc::new(reddit_client_from(config));
    PipelineDeps {
        store,
        auth: reddit.clone(),
        listing: reddit,
        generator: Arc::new(ChatProvider::new(&config.openai_api_key, &config.chat_model)),
        embedder: Arc::new(EmbeddingProvider::new(
            &config.openai_api_key,
            &config.embedding_model,
        )),
        redirect_uri: config.reddit_redirect_uri.clone(),
        per_channel_limit: config.per_channel_limit,
        embed_on_ingest: config.embed_on_ingest,
    }
}
