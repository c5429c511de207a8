use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use rss_proxy::config::Config;
use rss_proxy::feed::{http_client, FeedCache};
use rss_proxy::server::{feed_path, routes, FeedProxy};

#[derive(Parser, Debug)]
#[command(
    name = "rss-proxy",
    about = "Caching RSS/podcast proxy serving rule-filtered feeds"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Listen address, overrides server.listen_address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    config.validate().context("Invalid configuration")?;

    if config.feeds.is_empty() {
        bail!(
            "No feeds configured in '{}': add at least one [[feeds]] entry",
            args.config.display()
        );
    }

    let server = config.server;
    let feeds = config.feeds;
    let listen = args
        .listen
        .unwrap_or_else(|| server.listen_address.clone());

    let client = http_client(server.upstream_timeout()).context("Failed to build HTTP client")?;
    let cache = Arc::new(FeedCache::new(client, server.cache_ttl()));
    let proxy = web::Data::new(FeedProxy::new(cache, server.base_url.clone()));

    for feed in &feeds {
        tracing::info!(
            feed_id = %feed.id,
            path = %feed_path(&server.route_prefix, &feed.id),
            source = %feed.source,
            public_url = ?server.public_feed_url(&feed.id),
            rules = feed.rules.len(),
            "Serving feed"
        );
    }

    tracing::info!(
        listen = %listen,
        cache_ttl_secs = server.cache_ttl_secs,
        "Starting rss-proxy"
    );

    let route_prefix = server.route_prefix;
    HttpServer::new(move || {
        App::new()
            .app_data(proxy.clone())
            .configure(|cfg| routes(cfg, &route_prefix, &feeds))
    })
    .bind(&listen)
    .with_context(|| format!("Failed to bind {listen}"))?
    .run()
    .await
    .context("HTTP server failed")?;

    Ok(())
}
