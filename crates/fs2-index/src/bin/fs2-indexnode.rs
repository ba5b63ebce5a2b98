//! Indexnode binary entry point: loads configuration, assembles the
//! shared state, and runs the HTTP server, liveness loop, and advertiser
//! concurrently.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use fs2_index::config::IndexConfig;

#[derive(Parser, Debug)]
#[command(name = "fs2-indexnode", about = "FS2 indexnode server")]
struct Cli {
    /// Path to the indexnode TOML config file; defaults to the
    /// platform config directory.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(IndexConfig::default_path)
        .expect("no usable config path; pass --config explicitly");

    let mut config = IndexConfig::load(&config_path);
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let state = fs2_index::build_state(config.clone());
    let router = fs2_index::http::build_router(state.clone());

    tokio::spawn(fs2_index::run_liveness_loop(state.clone()));

    if config.advertise {
        let port = config.listen_addr.port();
        tokio::spawn(async move {
            let broadcast_addr: SocketAddr = ([255, 255, 255, 255], fs2_core::ADVERTISEMENT_DATAGRAM_PORT).into();
            match fs2_core::transport::UdpAdvertTransport::bind(broadcast_addr).await {
                Ok(transport) => {
                    let advertiser = fs2_index::advertiser::Advertiser::new(Arc::new(transport), port);
                    advertiser.run().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind advertiser socket, advertising disabled");
                }
            }
        });
    }

    tracing::info!(addr = %config.listen_addr, "fs2-indexnode listening");
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
