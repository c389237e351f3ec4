//! I Ching oracle HTTP server binary.
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` - required
//! - `OPENAI_MODEL` - model name (default: `gpt-4o`)
//! - `ORACLE_STORE` - `supabase` (default) or `sqlite`
//! - `SUPABASE_URL`, `SUPABASE_API_KEY` - required for the Supabase store
//! - `ORACLE_SQLITE_PATH` - SQLite database file (default: `oracle.db`)
//! - `ORACLE_DATA_DIR` - read reference texts from a local directory instead
//! - `ORACLE_IMAGE_DIR` - directory served at `/images` (SQLite default: `images`)
//! - `HOST`, `PORT` - bind address (default: `0.0.0.0:8000`)
//! - `RUST_LOG` - tracing filter (default: `info,iching_oracle=debug`)
//!
//! A `.env` file in the working directory is loaded first. See `OracleConfig`
//! for the full list.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! # or self-hosted:
//! ORACLE_STORE=sqlite cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use iching_oracle::auth::{AuthProvider, BearerIdentityAuth, SupabaseAuth};
use iching_oracle::generator::{PromptTemplates, ReadingGenerator};
use iching_oracle::llms::providers::OpenAICompletion;
use iching_oracle::server::{app_router, AppState};
use iching_oracle::store::{Backend, ContentStore, LocalContentStore, SqliteStore, SupabaseBackend};
use iching_oracle::utilities::config::{OracleConfig, StoreKind};
use iching_oracle::Oracle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,iching_oracle=debug".into()),
        )
        .init();

    let config = OracleConfig::from_env().context("Failed to load configuration")?;

    let backend: Arc<dyn Backend> = match config.store {
        StoreKind::Supabase => {
            let supabase = config
                .supabase
                .as_ref()
                .context("Supabase configuration missing")?;
            Arc::new(SupabaseBackend::new(supabase)?)
        }
        StoreKind::Sqlite => {
            tracing::info!("Opening SQLite store at {}", config.sqlite_path.display());
            Arc::new(SqliteStore::open(&config.sqlite_path)?.with_image_base_url(&config.image_base_url))
        }
    };

    let auth: Arc<dyn AuthProvider> = match &config.supabase {
        Some(supabase) => Arc::new(SupabaseAuth::new(supabase)?),
        None => {
            tracing::warn!(
                "No Supabase credentials: bearer tokens are accepted as user ids. Do not expose this server."
            );
            Arc::new(BearerIdentityAuth)
        }
    };

    let content: Arc<dyn ContentStore> = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Reading reference texts from {}", dir.display());
            Arc::new(LocalContentStore::new(dir))
        }
        None => backend.content(),
    };

    let templates = PromptTemplates::load(
        config.system_prompt_file.as_deref(),
        config.follow_up_prompt_file.as_deref(),
    )?;
    let llm = Arc::new(OpenAICompletion::from_config(&config.llm)?);
    tracing::info!("Using OpenAI model {}", config.llm.model);

    let oracle = Oracle::new(content, ReadingGenerator::new(llm, templates));
    let mut state = AppState::new(oracle, Arc::clone(&backend), auth, config.plans);
    if let Some(dir) = &config.image_dir {
        tracing::info!("Serving hexagram images from {}", dir.display());
        state = state.with_image_dir(dir);
    }
    let app = app_router(state);

    let bind_addr = config.bind_addr();
    tracing::info!(
        "I Ching oracle v{} starting on {} ({} store)",
        iching_oracle::VERSION,
        bind_addr,
        backend.name()
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
