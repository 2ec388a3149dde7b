//! Replication coordinator service.
//!
//! Accepts mutation descriptors from the gateway and fans them out to a
//! key's replicas: eventual-mode tasks through a bounded queue with
//! retries, strong-mode tasks through a synchronous quorum race.

pub mod client;
pub mod coordinator;
pub mod http;
pub mod metrics;
pub mod task;

pub use client::{ReplicaClient, ReplicaError};
pub use coordinator::{Coordinator, StrongOutcome};
pub use metrics::{MetricsSnapshot, ReplicatorMetrics};
pub use task::{ReplicationTask, ReplicatorConfig};

use anyhow::Context;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about = "CoralKV replication coordinator", long_about = None)]
pub struct Args {
    /// Port to bind the HTTP server to.
    #[clap(long, env = "REPLICATOR_PORT", default_value = "8085")]
    pub port: u16,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!("starting replication coordinator");

    let config = ReplicatorConfig::default();
    let client = ReplicaClient::new(config.call_timeout).context("building replica client")?;
    let coordinator = Coordinator::start(config, client);

    let app = http::router(coordinator.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("binding to port")?;
    tracing::info!(port = args.port, "replication coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(coral_core::shutdown_signal())
        .await
        .context("serving HTTP")?;

    // Workers finish their current task; queued tasks are dropped.
    coordinator.shutdown();
    Ok(())
}
