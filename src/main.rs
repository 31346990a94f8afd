use std::path::Path;
use std::sync::Arc;

use dream_survey::config::Config;
use dream_survey::flow::FlowEngine;
use dream_survey::items::{loader, Pool};
use dream_survey::sink::SheetsSink;
use dream_survey::store::LibSqlBackend;
use dream_survey::telegram::{SurveyBot, TelegramApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📋 Dream Survey v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Questions: {}", config.questions_path);
    eprintln!("   Database: {}", config.db_path);

    // ── Items ────────────────────────────────────────────────────────────
    // A bad form definition is fatal: there is nothing to ask.
    let form = loader::load_definitions(Path::new(&config.questions_path)).await?;
    let pool = Arc::new(Pool::build(&form.items)?);
    eprintln!("   Items: {}", pool.len());

    // ── Store ────────────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.db_path), config.session_ttl)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );

    // ── Collaborators ───────────────────────────────────────────────────
    let sink = Arc::new(SheetsSink::new(&config.sheets));
    let api = Arc::new(TelegramApi::new(config.bot_token.clone()));

    let engine = Arc::new(FlowEngine::new(
        pool,
        backend.clone(),
        backend,
        api.clone(),
        sink,
        config.incremental_writes,
    ));

    let bot = SurveyBot::new(api, engine);
    bot.run().await;
    Ok(())
}
