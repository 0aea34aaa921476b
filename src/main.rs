//! Timeline rewards - engagement-weighted payouts for curated timelines

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timeline_rewards::{
    config::Args,
    db::MongoClient,
    server,
    store::{InMemoryTimelineStore, MongoTimelineStore, TimelineStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("timeline_rewards={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Timeline Rewards");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Neynar: {}", args.neynar.neynar_api_url);
    info!(
        "Relayer: {}",
        args.relayer.relayer_url.as_deref().unwrap_or("none (dry run)")
    );
    info!("Chain RPC: {}", args.rpc.rpc_url);
    info!("Share apportionment: {:?}", args.share_apportionment);
    info!("Claim TTL: {}s", args.claim_ttl_secs);
    info!("======================================");

    let store = open_store(&args).await;

    let state = server::AppState::with_services(args, store)?;
    server::run(Arc::new(state)).await?;

    Ok(())
}

/// MongoDB when configured; in-memory in dev mode when absent or unreachable
async fn open_store(args: &Args) -> Arc<dyn TimelineStore> {
    let in_memory = || -> Arc<dyn TimelineStore> {
        Arc::new(InMemoryTimelineStore::new(args.claim_ttl()))
    };

    let Some(uri) = args.mongodb_uri.as_deref() else {
        warn!("No MONGODB_URI (dev mode) - using the in-memory store, nothing is persisted");
        return in_memory();
    };

    let connected = match MongoClient::new(uri, &args.mongodb_db).await {
        Ok(client) => MongoTimelineStore::new(client, args.claim_ttl()).await,
        Err(e) => Err(e),
    };

    match connected {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Arc::new(store)
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, continuing in memory): {}", e);
            in_memory()
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    }
}
