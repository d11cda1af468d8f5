use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shardgate::clock::SystemClock;
use shardgate::config::ShardgateConfig;
use shardgate::http::HttpServer;
use shardgate::ratelimit::{build_limiter, Algorithm, RateLimiter};
use shardgate::store::{ShardedStore, Store};

/// Sharded in-memory request admission gate.
#[derive(Parser, Debug)]
#[command(name = "shardgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.listen_addr
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Admission algorithm, overrides rate_limiting.algorithm
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Requests per window, overrides rate_limiting.requests_per_window
    #[arg(long)]
    limit: Option<u64>,

    /// Window size in milliseconds, overrides rate_limiting.window_ms
    #[arg(long)]
    window_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut ShardgateConfig) {
        if let Some(addr) = self.listen {
            config.server.listen_addr = addr;
        }
        if let Some(algorithm) = self.algorithm {
            config.rate_limiting.algorithm = algorithm;
        }
        if let Some(limit) = self.limit {
            config.rate_limiting.requests_per_window = limit;
        }
        if let Some(window_ms) = self.window_ms {
            config.rate_limiting.window_ms = window_ms;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Shardgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ShardgateConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        algorithm = %config.rate_limiting.algorithm,
        limit = config.rate_limiting.requests_per_window,
        window_ms = config.rate_limiting.window_ms,
        "Configuration loaded"
    );

    let store = Arc::new(ShardedStore::new(config.store.to_store_config()));
    let limiter = build_limiter(
        config.rate_limiting.algorithm,
        store.clone(),
        config.rate_limiting.requests_per_window,
        config.rate_limiting.window(),
        Arc::new(SystemClock),
    )?;
    info!(algorithm = %limiter.algorithm(), "Rate limiter initialized");

    let server = HttpServer::new(config.server.listen_addr, limiter, store.clone())
        .with_shutdown_grace(config.server.shutdown_grace())
        .with_timeouts(config.server.timeouts());

    // Close the store whether or not the server exited cleanly
    let served = server.serve().await;
    store.close().await?;

    let metrics = store.metrics();
    info!(
        hits = metrics.hits,
        misses = metrics.misses,
        evictions = metrics.evictions,
        live_keys = metrics.live_keys,
        "Shardgate stopped"
    );

    served?;
    Ok(())
}
