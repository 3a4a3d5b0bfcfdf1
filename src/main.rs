use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use pnl_aggregator::api;
use pnl_aggregator::engine::AggregationEngine;
use pnl_aggregator::store::PnlStore;
use pnl_aggregator::streams::{run_file_replay, run_live_stream};
use pnl_aggregator::types::{AppState, WsMessage};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Upstream event stream URL (newline-delimited JSON)
    #[arg(
        short,
        long,
        env = "STREAM_URL",
        default_value = "https://t1-coding-challenge-9snjm.ondigitalocean.app/stream"
    )]
    stream_url: String,

    /// Replay events from a local file instead of the live stream
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// SQLite database path for computed results
    #[arg(short, long, env = "DATABASE_PATH", default_value = "pnl.db")]
    database: String,

    /// Port to run the web server on
    #[arg(short, long, default_value = "3001")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pnl_aggregator=info".parse().unwrap()),
        )
        .init();

    let Args {
        stream_url,
        replay,
        database,
        port,
    } = Args::parse();

    info!("Starting PnL aggregation service");
    info!("Database: {}", database);
    info!("Port: {}", port);

    let store = Arc::new(PnlStore::new(&database)?);

    // Broadcast channel pushing computed results to WebSocket clients
    let (tx, _rx) = broadcast::channel::<WsMessage>(1000);

    let state = Arc::new(AppState {
        tx: tx.clone(),
        store: store.clone(),
    });

    // The consumer task exclusively owns the engine: events are
    // processed to completion one at a time, in arrival order.
    let engine = AggregationEngine::new(store.clone());

    let consumer_state = state.clone();
    let consumer = tokio::spawn(async move {
        let outcome = match replay {
            Some(path) => run_file_replay(&path, engine, consumer_state).await,
            None => run_live_stream(stream_url, engine, consumer_state).await,
        };
        if let Err(e) = outcome {
            error!("Event consumer failed: {:?}", e);
            std::process::exit(1);
        }
    });
    let consumer_abort = consumer.abort_handle();

    // Build router
    let app = Router::new()
        .route("/health", get(api::health))
        .route("/api/pnl", get(api::get_pnl))
        .route("/ws", get(api::ws_handler))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Give an in-flight persistence call a short grace deadline, then
    // stop the consumer. Unflushed buffered trades are lost by design:
    // the upstream stream is the durable source of truth.
    if tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .is_err()
    {
        warn!("Event consumer still running after grace period, aborting");
        consumer_abort.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
