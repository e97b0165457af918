mod fundamentals;
mod health;
mod history;
mod quote;
mod sources;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tickrelay_core::{
    CacheMode, CacheStore, CachedRouter, HttpClient, RelayConfig, ReqwestHttpClient,
    SourceRouterBuilder,
};
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::{Meta, Response};

/// Loads configuration, assembles the router and cache, then runs one command.
pub async fn run(cli: &Cli) -> Result<Response, CliError> {
    let started = Instant::now();

    let config = RelayConfig::load(cli.config.as_deref())?;
    let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let router = SourceRouterBuilder::from_config(&config, http_client)?.build();
    debug!(sources = router.sources().len(), "router assembled");

    let mode = if cli.no_cache {
        CacheMode::Bypass
    } else {
        CacheMode::Use
    };
    let store = CacheStore::default().with_max_entries(config.cache_max_entries);
    let relay = CachedRouter::with_store(router, store, config.cache).with_mode(mode);

    let data = match &cli.command {
        Command::Quote(args) => quote::run(args, &relay).await?,
        Command::History(args) => history::run(args, &relay).await?,
        Command::Fundamentals(args) => fundamentals::run(args, &relay).await?,
        Command::Health => {
            let timeout = Duration::from_millis(config.health_timeout_ms);
            health::run(relay.inner(), timeout).await?
        }
        Command::Sources => sources::run(relay.inner())?,
    };

    Ok(Response {
        data,
        meta: Meta {
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cache: relay.stats(),
        },
    })
}
