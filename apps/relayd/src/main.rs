mod cli;
mod handlers;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;

use relayd_core::dispatch::DispatchConfig;
use relayd_core::{Engine, WreqUpstreamClient};
use relayd_pool::{PoolState, ProxyConfig, StatsStore};

use cli::CliArgs;
use handlers::AppState;
use listener::{ExitReason, ListenError};

/// Exit codes: 0 clean, 1 config invalid at startup, 2 bind failed, 130 SIGINT.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => fail_startup(err),
    };
    let pool = Arc::new(PoolState::new());
    if let Err(err) = pool.replace(config.endpoints.clone()).await {
        fail_startup(anyhow::Error::new(err).context("config invalid"));
    }

    let stats_path = args.stats_path();
    let stats = Arc::new(StatsStore::load(&stats_path).await);
    spawn_periodic_save(stats.clone(), stats_path.clone());

    let dispatch_config = DispatchConfig {
        proxy: args.proxy.clone(),
        ..DispatchConfig::default()
    };
    let client = match WreqUpstreamClient::new(dispatch_config) {
        Ok(client) => Arc::new(client),
        Err(err) => fail_startup(anyhow::Error::new(err).context("build upstream client")),
    };
    let engine = Engine::new(pool.clone(), stats.clone(), client);
    let state = Arc::new(AppState { engine, pool });

    let host = args.host.clone().unwrap_or(config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let config_path = args.config.clone();

    let make_router = move || build_router(state.clone());
    let outcome = listener::serve(make_router, host, port, config_path).await;
    if let Err(err) = stats.save(&stats_path).await {
        tracing::warn!(%err, "failed to persist stats.json on shutdown");
    }
    match outcome {
        Ok(ExitReason::Clean) => std::process::exit(0),
        Ok(ExitReason::Interrupted) => std::process::exit(130),
        Err(ListenError::Bind(err)) => {
            tracing::error!(%err, "bind failed");
            std::process::exit(2);
        }
        Err(ListenError::Other(err)) => {
            tracing::error!(%err, "listener failed");
            std::process::exit(1);
        }
    }
}

fn fail_startup(err: anyhow::Error) -> ! {
    tracing::error!(%err, "startup failed");
    std::process::exit(1);
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::create_message))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .with_state(state)
}

fn load_config(args: &CliArgs) -> anyhow::Result<ProxyConfig> {
    let body = std::fs::read(&args.config)
        .with_context(|| format!("read config file {}", args.config.display()))?;
    ProxyConfig::from_json(&body).with_context(|| format!("parse config file {}", args.config.display()))
}

fn spawn_periodic_save(stats: Arc<StatsStore>, path: std::path::PathBuf) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Err(err) = stats.save(&path).await {
                tracing::warn!(%err, "failed to persist stats.json");
            }
        }
    });
}
