//! Vantage — a split-horizon DNS forwarder.
//!
//! Answers from static sources and a response cache when possible, and
//! otherwise routes queries between a trusted local resolver pool and a
//! tunnelled remote pool, validating local answers against the local
//! network's address space.

mod assemble;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use vantage_config::Config;
use vantage_server::{Handler, TcpServer, UdpServer};

/// Split-horizon DNS forwarder.
#[derive(Parser, Debug)]
#[command(name = "vantage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; flags below override nothing when this is set
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address for UDP and TCP
    #[arg(short = 's', long, value_name = "ADDR")]
    server: Option<SocketAddr>,

    /// Cache size in entries (0 disables the cache)
    #[arg(short = 'c', long, value_name = "N")]
    cache: Option<usize>,

    /// Serve stale cache entries for this many extra seconds
    #[arg(long, value_name = "SECS")]
    lazy_cache_ttl: Option<u64>,

    /// Hosts files
    #[arg(long, value_name = "FILE")]
    hosts: Vec<PathBuf>,

    /// Arbitrary-record files
    #[arg(long, value_name = "FILE")]
    arbitrary: Vec<PathBuf>,

    /// Blacklist domain files
    #[arg(long, value_name = "FILE")]
    blacklist_domain: Vec<PathBuf>,

    /// Upstream servers (enables simple forwarding mode)
    #[arg(long, value_name = "ADDR")]
    upstream: Vec<String>,

    /// Local upstream servers (required without --upstream)
    #[arg(long, value_name = "ADDR")]
    local_upstream: Vec<String>,

    /// Local network CIDR files (required without --upstream)
    #[arg(long, value_name = "FILE")]
    local_ip: Vec<PathBuf>,

    /// Domain files always routed to the local upstreams
    #[arg(long, value_name = "FILE")]
    local_domain: Vec<PathBuf>,

    /// Milliseconds to hold a remote answer while the local pool works
    #[arg(long, value_name = "MS", default_value_t = 50)]
    local_latency: u64,

    /// Remote upstream servers (required without --upstream)
    #[arg(long, value_name = "ADDR")]
    remote_upstream: Vec<String>,

    /// Domain files always routed to the remote upstreams
    #[arg(long, value_name = "FILE")]
    remote_domain: Vec<PathBuf>,

    /// Verbose log
    #[arg(short = 'v', long)]
    debug: bool,
}

impl Cli {
    /// Builds the effective configuration: the config file when given,
    /// the flags otherwise.
    fn into_config(self) -> Result<(Config, bool)> {
        if let Some(path) = &self.config {
            let config = Config::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            return Ok((config, self.debug));
        }

        let mut config = Config::default();
        if let Some(listen) = self.server {
            config.server.listen = listen;
        }
        if let Some(size) = self.cache {
            config.cache.size = size;
        }
        if let Some(lazy) = self.lazy_cache_ttl {
            config.cache.lazy_ttl = lazy;
        }
        config.hosts = self.hosts;
        config.arbitrary = self.arbitrary;
        config.blacklist_domain = self.blacklist_domain;
        config.upstream = self.upstream;
        config.local.upstream = self.local_upstream;
        config.local.ip = self.local_ip;
        config.local.domain = self.local_domain;
        config.local.latency = self.local_latency;
        config.remote.upstream = self.remote_upstream;
        config.remote.domain = self.remote_domain;

        Ok((config, self.debug))
    }
}

async fn run_server(config: Config) -> Result<()> {
    let pipeline = assemble::build_pipeline(&config)?;
    let handler: Arc<dyn Handler> = Arc::new(pipeline);

    let udp = UdpServer::bind(config.server.listen, handler.clone())
        .await
        .context("failed to bind udp listener")?;
    let tcp = TcpServer::bind(config.server.listen, handler)
        .await
        .context("failed to bind tcp listener")?;

    info!(listen = %config.server.listen, "server started");

    let udp_task = tokio::spawn(async move { udp.run().await });
    let tcp_task = tokio::spawn(async move { tcp.run().await });

    tokio::select! {
        result = udp_task => {
            error!("udp listener exited: {:?}", result);
        }
        result = tcp_task => {
            error!("tcp listener exited: {:?}", result);
        }
        signal = shutdown_signal() => {
            info!("{signal}, exiting");
        }
    }

    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = signal::ctrl_c() => "interrupt",
        _ = sigterm.recv() => "terminated",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, debug) = cli.into_config()?;

    logging::init_logging(&config.logging, debug);

    info!(version = env!("CARGO_PKG_VERSION"), "vantage starting");

    config.validate().context("invalid configuration")?;

    run_server(config).await
}
