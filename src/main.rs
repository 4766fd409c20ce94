use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use pulse_auth::TokenVerifier;
use pulse_core::ids::UserId;
use pulse_core::{Identity, Role, UpdateEvent};
use pulse_server::ServerConfig;
use pulse_store::{Database, StoreOracle};
use pulse_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "pulse", about = "Real-time subscription/broadcast server for task collaboration")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (the default when no subcommand is given).
    Serve {
        /// Path to the SQLite database. Defaults to ~/.pulse/pulse.db.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Emit JSON-formatted log lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Mint a signed bearer token for development and testing.
    Token {
        /// User id to embed in the token.
        #[arg(long)]
        user: String,
        /// Email to embed; defaults to `<user>@localhost`.
        #[arg(long)]
        email: Option<String>,
        /// Comma-separated roles: admin, member, guest.
        #[arg(long, value_delimiter = ',', default_value = "member")]
        roles: Vec<String>,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 86_400)]
        ttl: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve {
        db: None,
        json_logs: false,
    }) {
        Command::Serve { db, json_logs } => serve(db, json_logs).await,
        Command::Token {
            user,
            email,
            roles,
            ttl,
        } => mint_token(&user, email, &roles, ttl),
    }
}

async fn serve(db_path: Option<PathBuf>, json_logs: bool) -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig {
        json_output: json_logs,
        ..Default::default()
    });

    let secret = signing_secret()?;
    let config = ServerConfig::from_env();

    let db_path = db_path.unwrap_or_else(|| pulse_home().join("pulse.db"));
    let db = Database::open(&db_path)?;

    let verifier = Arc::new(TokenVerifier::new(&secret));
    let oracle = Arc::new(StoreOracle::new(db.clone()));
    let (event_tx, _) = broadcast::channel::<UpdateEvent>(1024);

    let handle = pulse_server::start(config, db, verifier, oracle, event_tx).await?;
    tracing::info!(port = handle.port, "pulse server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}

fn mint_token(user: &str, email: Option<String>, roles: &[String], ttl: i64) -> anyhow::Result<()> {
    let secret = signing_secret()?;
    let roles = roles
        .iter()
        .map(|r| match r.as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "guest" => Ok(Role::Guest),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let identity = Identity::new(
        UserId::from_raw(user),
        email.unwrap_or_else(|| format!("{user}@localhost")),
        roles,
    );
    let token = TokenVerifier::new(&secret).mint_for(&identity, ttl)?;
    println!("{token}");
    Ok(())
}

fn signing_secret() -> anyhow::Result<String> {
    std::env::var("PULSE_SECRET").context("PULSE_SECRET must be set")
}

fn pulse_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".pulse")
}
