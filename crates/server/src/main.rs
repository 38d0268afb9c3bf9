use clap::Parser;
use lorepin_server::Config;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::parse();
    let db_path = config.db_path();
    tracing::info!(db = %db_path.display(), "opening database");

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    lorepin_server::serve_listener(listener, db_path, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;
    Ok(())
}
