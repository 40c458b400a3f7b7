//! Builds the pipeline out of the configuration.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use vantage_cache::ResponseCache;
use vantage_config::Config;
use vantage_match::{Arbitrary, DomainSet, Hosts, IpSet, QNameMatcher, ResponseIpMatcher};
use vantage_resolver::{Dispatcher, Pool, SocketUpstream, SplitConfig};
use vantage_server::Pipeline;

/// Assembles the full pipeline. Any error here is fatal: the server must
/// not start on a partial configuration.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let dispatcher = Arc::new(build_dispatcher(config)?);
    let mut pipeline = Pipeline::new(dispatcher);

    if !config.hosts.is_empty() {
        let mut hosts = Hosts::new();
        hosts
            .load_files(&config.hosts)
            .context("failed to load hosts")?;
        info!(names = hosts.len(), "hosts loaded");
        pipeline = pipeline.with_hosts(Arc::new(hosts));
    }

    if !config.arbitrary.is_empty() {
        let mut arbitrary = Arbitrary::new();
        arbitrary
            .load_files(&config.arbitrary)
            .context("failed to load arbitrary records")?;
        info!(keys = arbitrary.len(), "arbitrary records loaded");
        pipeline = pipeline.with_arbitrary(Arc::new(arbitrary));
    }

    if !config.blacklist_domain.is_empty() {
        let matcher = load_domains("blacklist", &config.blacklist_domain)?;
        pipeline = pipeline.with_blacklist(Arc::new(matcher));
    }

    if config.cache.size > 0 {
        let cache = ResponseCache::new(vantage_cache::CacheConfig {
            capacity: config.cache.size,
            lazy_ttl: config.cache.lazy_ttl_duration(),
            lazy_reply_ttl: config.cache.lazy_reply_ttl,
            ..vantage_cache::CacheConfig::default()
        });
        info!(capacity = config.cache.size, "cache enabled");
        pipeline = pipeline.with_cache(Arc::new(cache));
    }

    if config.cache.min_ttl.is_some() || config.cache.max_ttl.is_some() {
        pipeline = pipeline.with_ttl_bounds(
            config.cache.min_ttl.unwrap_or(0),
            config.cache.max_ttl.unwrap_or(u32::MAX),
        );
    }

    Ok(pipeline)
}

fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    if config.is_simple_forwarder() {
        let pool = build_pool("upstream", &config.upstream)?;
        return Ok(Dispatcher::forwarder(pool));
    }

    let local = build_pool("local upstream", &config.local.upstream)?;
    let remote = build_pool("remote upstream", &config.remote.upstream)?;

    let mut local_ips = IpSet::new();
    local_ips
        .load_files(&config.local.ip)
        .context("failed to load local ip")?;
    info!(networks = local_ips.len(), "local ip matcher loaded");

    let local_domains = if config.local.domain.is_empty() {
        None
    } else {
        Some(load_domains("local", &config.local.domain)?)
    };
    let remote_domains = if config.remote.domain.is_empty() {
        None
    } else {
        Some(load_domains("remote", &config.remote.domain)?)
    };

    Ok(Dispatcher::split(SplitConfig {
        local,
        remote,
        local_ips: ResponseIpMatcher::new(local_ips),
        local_domains,
        remote_domains,
        local_latency: config.local.latency_duration(),
    }))
}

fn build_pool(what: &str, addrs: &[String]) -> Result<Pool> {
    let mut pool: Pool = Vec::with_capacity(addrs.len());
    for (i, addr) in addrs.iter().enumerate() {
        // The first member of every pool is the trusted one.
        let upstream = SocketUpstream::from_addr(addr, i == 0)
            .with_context(|| format!("failed to init {what} #{i}"))?;
        pool.push(Arc::new(upstream));
    }
    Ok(pool)
}

fn load_domains(name: &str, files: &[std::path::PathBuf]) -> Result<QNameMatcher> {
    let mut set = DomainSet::new();
    set.load_files(files)
        .with_context(|| format!("failed to load {name} domains"))?;
    info!(rules = set.len(), "{name} domain matcher loaded");
    Ok(QNameMatcher::new(set))
}
