//! Gateway service: the public face of the store.
//!
//! Authenticates API keys through an [`IdentityProvider`], admits requests
//! through per-tenant token buckets, routes each key to its primary and
//! replicas via the consistent-hash ring, and orchestrates the
//! primary-write → replication fan-out with the caller's chosen
//! consistency.

pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod ratelimit;
pub mod usage;

pub use handlers::{GatewayState, KvWriteResponse, FORWARD_TIMEOUT};
pub use identity::{HttpIdentityProvider, IdentityProvider, StaticIdentityProvider, UserId};
pub use ratelimit::RateLimiter;
pub use usage::{HttpUsageSink, NoopUsageSink, UsageRecord, UsageSink};

use anyhow::Context;
use coral_core::NodeAddr;
use coral_ring::HashRing;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about = "CoralKV gateway", long_about = None)]
pub struct Args {
    /// Port to bind the HTTP server to.
    #[clap(long, env = "GATEWAY_PORT", default_value = "8080")]
    pub port: u16,
    /// Comma-separated storage node URLs.
    #[clap(
        long,
        env = "DHT_NODES",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:8082,http://127.0.0.1:8083,http://127.0.0.1:8084"
    )]
    pub nodes: Vec<String>,
    /// Replication coordinator port (assumed local).
    #[clap(long, env = "REPLICATOR_PORT", default_value = "8085")]
    pub replicator_port: u16,
    /// Identity provider port (assumed local).
    #[clap(long, env = "USERMANAGER_PORT", default_value = "8081")]
    pub usermanager_port: u16,
    /// Token bucket capacity per user.
    #[clap(long, env = "GATEWAY_RATE_CAPACITY", default_value = "10")]
    pub rate_capacity: f64,
    /// Token refill rate per user, tokens per minute.
    #[clap(long, env = "GATEWAY_RATE_REFILL_PER_MINUTE", default_value = "100")]
    pub rate_refill_per_minute: f64,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(nodes = ?args.nodes, "starting gateway");

    let ring = HashRing::with_defaults(
        args.nodes
            .iter()
            .map(|n| NodeAddr::from(n.trim()))
            .filter(|n| !n.as_str().is_empty()),
    );

    let usermanager_url = format!("http://127.0.0.1:{}", args.usermanager_port);
    let identity = Arc::new(HttpIdentityProvider::new(
        usermanager_url.clone(),
        FORWARD_TIMEOUT,
    )?);
    let usage = Arc::new(HttpUsageSink::new(usermanager_url, FORWARD_TIMEOUT)?);

    let http = reqwest::Client::builder()
        .timeout(FORWARD_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let state = Arc::new(GatewayState {
        ring,
        http,
        identity,
        usage,
        limiter: RateLimiter::new(args.rate_capacity, args.rate_refill_per_minute),
        replicator_url: format!("http://127.0.0.1:{}", args.replicator_port),
    });

    // Reclaim buckets for tenants that have gone quiet.
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ratelimit::IDLE_BUCKET_MAX_AGE);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = sweep_state.limiter.sweep_idle(ratelimit::IDLE_BUCKET_MAX_AGE);
            if swept > 0 {
                tracing::debug!(swept, "swept idle rate-limit buckets");
            }
        }
    });

    let app = handlers::router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("binding to port")?;
    tracing::info!(port = args.port, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(coral_core::shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}
