//! Keykeeper - physical key custody service

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keykeeper::{
    config::{Args, StorageBackend},
    db::MongoClient,
    server::{self, AppState},
    services::{spawn_audit_task, LogNotifier, Notifier, RelayNotifier},
    store::Stores,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("keykeeper={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Keykeeper - key custody service");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Storage: {}", args.storage);
    info!("CAS: {}", args.cas_server_url);
    info!("======================================");

    let stores = match args.storage {
        StorageBackend::Mongo => {
            let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            Stores::mongo(&mongo).await?
        }
        StorageBackend::Memory => {
            warn!("In-memory storage - all data is lost when the process exits");
            Stores::memory()
        }
    };

    let notifier: Arc<dyn Notifier> = match &args.mail_relay_url {
        Some(url) => {
            info!("Notifications relayed via {}", url);
            Arc::new(RelayNotifier::new(url)?)
        }
        None => {
            info!("No mail relay configured - notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let audit_interval = args.audit_interval_secs;
    let state = Arc::new(AppState::new(args, &stores, notifier)?);

    if audit_interval > 0 {
        spawn_audit_task(
            Arc::clone(&state.services.custody),
            Duration::from_secs(audit_interval),
        );
        info!("Consistency audit every {}s", audit_interval);
    }

    server::run(state).await?;

    Ok(())
}
