use std::sync::Arc;

use clap::Parser;
use canopy_core::llm::{ChatCompletionClient, LlmConfig};
use canopy_core::CanopyConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use canopy_server::router::AppState;
use canopy_server::subsystems::progress::BuildTracker;
use canopy_server::{http, server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "canopy.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match CanopyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match canopy_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match canopy_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Canopy DB health check passed");
        return Ok(());
    }

    if let Err(e) = canopy_core::store::init_schema(&pool).await {
        eprintln!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    // Completion backend — the API key comes from the environment
    // (CANOPY_API_KEY or DEEPSEEK_API_KEY)
    let llm_config = LlmConfig::new(None, &config.llm);
    let backend: Arc<dyn canopy_core::CompletionBackend> =
        match ChatCompletionClient::new(llm_config, config.llm.base_url.clone()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                eprintln!("Failed to create completion backend: {}", e);
                std::process::exit(1);
            }
        };

    let state = AppState {
        pool,
        config: config.clone(),
        tracker: BuildTracker::new(),
        backend,
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn HTTP REST API server if enabled
    if config.http.enabled {
        let http_state = Arc::new(state.clone());
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
