//! Storage node service.
//!
//! Owns one shard's data: an in-memory map with TTL, durably backed by a
//! write-ahead log that is replayed at boot. Serves the internal
//! `/store/{key}` surface the gateway and replication coordinator call.

pub mod http;
pub mod maintenance;
pub mod store;
pub mod wal;

pub use store::{Entry, Store};
pub use wal::{Wal, WalRecord, WalRecordError};

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about = "CoralKV storage node", long_about = None)]
pub struct Args {
    /// Port to bind the HTTP server to.
    #[clap(long, env = "DHTNODE_PORT", default_value = "8082")]
    pub port: u16,
    /// Identity of this node; also names the WAL file.
    #[clap(long, env = "NODE_ID", default_value = "node-1")]
    pub node_id: String,
    /// Directory holding the WAL.
    #[clap(long, env = "DHT_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(node_id = args.node_id, "starting storage node");

    // A WAL that cannot be opened or replayed is a startup failure.
    let store = Arc::new(
        Store::open(&args.node_id, &args.data_dir)
            .with_context(|| format!("opening WAL in {}", args.data_dir.display()))?,
    );

    maintenance::spawn_ttl_reaper(Arc::clone(&store), maintenance::REAPER_INTERVAL);
    maintenance::spawn_compaction(
        Arc::clone(&store),
        maintenance::COMPACTION_CHECK_INTERVAL,
        maintenance::COMPACTION_THRESHOLD_BYTES,
    );

    let app = http::router(store).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("binding to port")?;
    tracing::info!(port = args.port, node_id = args.node_id, "storage node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(coral_core::shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}
