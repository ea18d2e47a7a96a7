//! REVP control-plane daemon
//!
//! Observes containers on SSH-reachable Docker hosts, compiles routing
//! labels and static route records into services, and keeps the
//! proxy's live configuration convergent with the desired set.

use anyhow::{Context, Result};
use clap::Parser;
use revp_daemon::{AppConfig, Supervisor};
use revp_labels::compile_static_records;
use revp_routes::StaticRouteStore;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(
    name = "revp-daemon",
    version,
    about = "Dynamic reverse-proxy control plane"
)]
struct Args {
    /// Config file path
    #[clap(short, long, default_value = "/etc/revp/config.yaml")]
    config: PathBuf,

    /// Load configuration and the static route file, print a summary,
    /// and exit
    #[clap(long)]
    validate: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                [
                    "revp_daemon",
                    "revp_ssh",
                    "revp_docker",
                    "revp_labels",
                    "revp_routes",
                    "revp_registry",
                    "revp_caddy",
                    "revp_reconciler",
                ]
                .map(|target| format!("{}={}", target, log_level))
                .join(",")
                .parse()
                .unwrap()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting REVP control plane");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    if args.validate {
        return validate(&config).await;
    }

    let root = CancellationToken::new();
    let signal_token = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    Supervisor::new(config, root).run().await?;

    info!("REVP control plane stopped");
    Ok(())
}

/// Operator dry run: parse everything, compile the static routes, and
/// report what the daemon would start with
async fn validate(config: &AppConfig) -> Result<()> {
    let store = StaticRouteStore::open(&config.static_routes_file)
        .await
        .context("opening static route file")?;
    let records = store.list().await;
    let (services, warnings) = compile_static_records(&records);

    println!("configuration OK");
    println!(
        "  hosts: {} declared, {} enabled",
        config.hosts.len(),
        config.enabled_hosts().len()
    );
    println!("  proxy admin: {}", config.proxy.admin_url);
    println!(
        "  static routes: {} records, {} services",
        records.len(),
        services.len()
    );
    for warning in &warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}
