//! Keygate API server binary.
//!
//! Connects to PostgreSQL, runs migrations and serves the auth routes. Reset
//! and verification emails go out over SMTP when `--smtp-host` is set and are
//! only logged otherwise.

use std::sync::Arc;

use clap::Parser;
use keygate_core::auth::{AuthCore, BcryptHasher};
use keygate_core::config::AuthConfig;
use keygate_core::notify::{LogNotifier, Notifier, SmtpNotifier, SmtpSettings};
use keygate_core::store::PgCredentialStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

const DEFAULT_LOG_FILTER: &str = "info,keygate_api=debug,keygate_core=debug";

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "keygate_server", about = "Keygate API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 3100)]
    port: u16,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keygate"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// SMTP relay host. Without it notifications are logged, not sent.
    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    smtp_port: u16,

    #[arg(long, env = "SMTP_USERNAME")]
    smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: Option<String>,

    /// `From` header for outgoing mail.
    #[arg(long, env = "SMTP_FROM", default_value = "Keygate <no-reply@localhost>")]
    smtp_from: String,

    /// Talk plain SMTP without TLS (local relays only).
    #[arg(long, env = "SMTP_INSECURE", default_value_t = false)]
    smtp_insecure: bool,
}

impl Args {
    fn notifier(&self) -> Result<Arc<dyn Notifier>, Box<dyn std::error::Error>> {
        let Some(host) = &self.smtp_host else {
            warn!("SMTP_HOST not set, notifications will only be logged");
            return Ok(Arc::new(LogNotifier));
        };
        let settings = SmtpSettings {
            host: host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            from: self.smtp_from.clone(),
            tls: !self.smtp_insecure,
        };
        Ok(Arc::new(SmtpNotifier::new(&settings)?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    info!(port = args.port, "starting keygate_server");

    let auth_config = AuthConfig::from_env()?;
    info!(config = ?auth_config, "auth configuration loaded");

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    keygate_api::migrate(&pool).await?;

    let core = AuthCore::new(
        auth_config,
        Arc::new(PgCredentialStore::new(pool)),
        Arc::new(BcryptHasher::default()),
        args.notifier()?,
    );

    let state = keygate_api::AppState {
        core: Arc::new(core),
    };

    let app = keygate_api::router(state);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
