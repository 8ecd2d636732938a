//! Querier Service
//!
//! Answers profiling queries by fanning out over the ingester replica ring
//! and merging the results.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinder_querier::client::http_client_factory;
use cinder_querier::ring::StaticRing;
use cinder_querier::{http, Querier, QuerierConfig};
use cinder_shared::utils::parse_duration;

#[derive(Parser, Debug)]
#[command(name = "cinder-querier")]
#[command(about = "Fan-out query coordinator for the cinder profiling pipeline", long_about = None)]
#[command(version)]
struct Args {
    /// Listen address for the query HTTP server
    #[arg(short, long)]
    listen: Option<String>,

    /// Ingester address forming the replica ring (repeatable)
    #[arg(short, long = "ingester")]
    ingesters: Vec<String>,

    /// Number of ingester failures tolerated per query
    #[arg(long, default_value = "0")]
    max_errors: usize,

    /// Time to wait for outstanding ingester calls once the quorum is
    /// reached (e.g. "1s"; 0 disables the grace window)
    #[arg(long, default_value = "0")]
    extra_query_delay: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    let mut config = QuerierConfig::default();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    config.ingesters = args.ingesters;
    config.max_errors = args.max_errors;
    config.extra_query_delay =
        parse_duration(&args.extra_query_delay).context("failed to parse extra query delay")?;
    config.validate()?;

    if config.ingesters.is_empty() {
        anyhow::bail!("at least one --ingester address is required");
    }

    info!("Starting cinder querier on {}", config.listen_addr);
    info!(
        "Replica ring: {} ingesters, {} tolerated errors",
        config.ingesters.len(),
        config.max_errors
    );

    let ring = Arc::new(StaticRing::new(config.ingesters.clone(), config.max_errors));
    let querier = Arc::new(Querier::new(&config, ring, http_client_factory()));

    let addr = config
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    tokio::select! {
        result = http::serve(addr, querier) => result.context("query HTTP server error")?,
        _ = shutdown_signal() => {}
    }

    info!("Querier shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("CINDER_LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}
