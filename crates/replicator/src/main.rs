use clap::Parser;

fn main() -> Result<(), anyhow::Error> {
    // Structured logs to stderr, filtered by RUST_LOG.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = coral_replicator::Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(runtime.spawn(async move { coral_replicator::run(args).await }));

    runtime.shutdown_timeout(std::time::Duration::from_secs(30));
    result?
}
