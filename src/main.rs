//! Studbook - ownership transfer service

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studbook::{
    config::{Args, LogFormat},
    db::MongoClient,
    projection::spawn_reconcile_task,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("studbook={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Studbook - Ownership Transfers");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db: {})", args.mongodb_uri, args.mongodb_db);
    info!("Identity header: {}", args.identity_header);
    info!("Transaction attempts: {}", args.transaction_retries);
    match args.reconcile_interval() {
        Some(interval) => info!("Reconcile interval: {}s", interval.as_secs()),
        None => info!("Reconcile interval: disabled"),
    }
    info!("Admin accounts: {}", args.admin_account_set().len());
    info!("======================================");

    // Connect to MongoDB (in-memory fallback in dev mode)
    let state = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            AppState::with_mongo(args.clone(), client).await?
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory ledger): {}", e);
                AppState::in_memory(args.clone())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };
    let state = Arc::new(state);

    if let Some(interval) = args.reconcile_interval() {
        spawn_reconcile_task(Arc::clone(&state.reconciler), interval);
        info!("Projection reconciler started (every {}s)", interval.as_secs());
    }

    server::run(state).await?;

    Ok(())
}
