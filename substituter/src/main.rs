//! Substituter - composite compendia for reproducible research

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use substituter::{
    config::Args,
    db::{MongoClient, MongoStore},
    server::{self, AppState},
    services::SubstitutionService,
    storage::{CompendiumStore, FsStorage, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("substituter={0},substitution_core={0},info", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Substituter - composite compendia");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (database '{}')", args.mongodb_uri, args.mongodb_db);
    info!("Compendia: {}", args.compendium_path().display());
    info!("Container workdir: {}", args.container_workdir);
    info!("======================================");

    // MongoDB is optional in dev mode
    let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await;
    let store: Arc<dyn CompendiumStore> = match mongo {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Arc::new(MongoStore::new(&client).await?)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory records): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let files = Arc::new(FsStorage::new(args.compendium_path()).await?);

    let service = SubstitutionService::new(args.substitution_config(), store, files);
    let state = Arc::new(AppState::new(args, service));

    server::run(state).await?;

    Ok(())
}
