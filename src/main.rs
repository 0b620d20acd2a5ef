use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulse_core::config::StreamTiming;
use pulse_server::{RoleAllowList, ServerConfig, StaticTokenProvider};

/// Real-time check-in feed server for the admissions portal.
#[derive(Parser, Debug)]
#[command(name = "campus-pulse", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PULSE_PORT", default_value_t = 4610)]
    port: u16,

    /// Outbound frames buffered per connection before a write counts as failed.
    #[arg(long, env = "PULSE_QUEUE_DEPTH", default_value_t = 64)]
    queue_depth: usize,

    /// Heartbeat interval in milliseconds.
    #[arg(long, env = "PULSE_HEARTBEAT_MS", default_value_t = 15_000)]
    heartbeat_ms: u64,

    /// Comma-separated roles allowed to hold a feed connection.
    #[arg(long, env = "PULSE_ALLOWED_ROLES", value_delimiter = ',', default_values_t = ["admin".to_string(), "staff".to_string()])]
    allowed_roles: Vec<String>,

    /// Bearer token granting admin access. A static table stands in until
    /// the portal's identity service is wired up.
    #[arg(long, env = "PULSE_ADMIN_TOKEN")]
    admin_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let timing = StreamTiming {
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        ..StreamTiming::from_env()
    };

    let identity = Arc::new(
        StaticTokenProvider::new().with_token(args.admin_token.clone(), "portal-admin", "admin"),
    );

    let config = ServerConfig {
        port: args.port,
        queue_depth: args.queue_depth,
        timing,
        allow_list: RoleAllowList::new(args.allowed_roles.clone()),
    };

    let handle = pulse_server::start(config, identity).await?;
    tracing::info!(port = handle.port, "campus-pulse feed server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    handle.shutdown();
    Ok(())
}
