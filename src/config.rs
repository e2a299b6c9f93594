//! Configuration for keykeeper
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! can also be set from the environment (or a `.env` file, loaded in main).

use clap::{Parser, ValueEnum};
use std::fmt;
use std::net::SocketAddr;

use crate::types::validation::validate_email;

/// Where keys, users, and the ledger live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// MongoDB collections
    Mongo,
    /// Process memory; everything is lost on exit
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Mongo => write!(f, "mongo"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Keykeeper - physical key inventory and custody service
#[derive(Parser, Debug, Clone)]
#[command(name = "keykeeper")]
#[command(about = "Tracks which physical keys exist, who holds them, and their history")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Development mode: any signed-in user passes admin checks, and a
    /// fixed session secret is used when none is configured
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Storage backend
    #[arg(long, env = "STORAGE", value_enum, default_value_t = StorageBackend::Mongo)]
    pub storage: StorageBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "keymanagementdb")]
    pub mongodb_db: String,

    /// Secret for signing session tokens (required in production)
    #[arg(long, env = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Session lifetime in days
    #[arg(long, env = "SESSION_TTL_DAYS", default_value = "31")]
    pub session_ttl_days: u64,

    /// Mark the session cookie `Secure`
    #[arg(long, env = "COOKIE_SECURE", default_value = "true", action = clap::ArgAction::Set)]
    pub cookie_secure: bool,

    /// Browser origin allowed to call the API with credentials (e.g. the web UI)
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// CAS server base URL
    #[arg(long, env = "CAS_SERVER_URL", default_value = "https://login.vt.edu/profile/cas")]
    pub cas_server_url: String,

    /// This service's CAS callback URL
    #[arg(
        long,
        env = "SERVICE_URL",
        default_value = "http://localhost:5000/api/cas/login_callback"
    )]
    pub service_url: String,

    /// Address that receives return and report notifications
    #[arg(long, env = "ADMIN_EMAIL", default_value = "keyadmin@example.edu")]
    pub admin_email: String,

    /// From address on outgoing notifications
    #[arg(long, env = "MAIL_SENDER", default_value = "keymanagementsystem@example.edu")]
    pub mail_sender: String,

    /// HTTP mail relay; notifications are only logged when unset
    #[arg(long, env = "MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    /// Seconds between background consistency audits (0 disables)
    #[arg(long, env = "AUDIT_INTERVAL_SECS", default_value = "0")]
    pub audit_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Session lifetime in seconds
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_days * 24 * 60 * 60
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.session_secret {
                None => return Err("SESSION_SECRET is required in production mode".to_string()),
                Some(secret) if secret.len() < 32 => {
                    return Err("SESSION_SECRET must be at least 32 characters".to_string())
                }
                Some(_) => {}
            }
        }

        if self.session_ttl_days == 0 {
            return Err("SESSION_TTL_DAYS must be at least 1".to_string());
        }

        validate_email(&self.admin_email).map_err(|e| format!("ADMIN_EMAIL: {}", e))?;
        validate_email(&self.mail_sender).map_err(|e| format!("MAIL_SENDER: {}", e))?;

        Ok(())
    }
}
