//! Client binary entry point: loads configuration, assembles the shared
//! state, and runs the share engine, communicator, download controller,
//! auto-indexnode election, and HTTP server concurrently.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use fs2_client::config::ClientConfig;

#[derive(Parser, Debug)]
#[command(name = "fs2-client", about = "FS2 client")]
struct Cli {
    /// Path to the client TOML config file; defaults to the platform
    /// config directory.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Alias advertised to indexnodes during /hello.
    #[arg(long, default_value = "fs2-client")]
    alias: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(ClientConfig::default_path)
        .expect("no usable config path; pass --config explicitly");

    let mut config = ClientConfig::load(&config_path);
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let state_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(std::env::temp_dir);

    let cltoken: u64 = {
        let mut bytes = [0u8; 8];
        getrandom::getrandom(&mut bytes).expect("system RNG unavailable");
        u64::from_le_bytes(bytes)
    };

    let client = fs2_client::build_client(config.clone(), state_dir, cli.alias, cltoken);

    for share in client.shares.all() {
        let engine = client.shares.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.refresh(share).await {
                tracing::warn!(error = %e, "initial share build failed");
            }
        });
    }

    client.spawn_background_tasks();

    if config.auto_indexnode_enabled {
        let broadcast_addr: SocketAddr = ([255, 255, 255, 255], fs2_core::ADVERTISEMENT_DATAGRAM_PORT).into();
        let capability = fs2_client::auto_indexnode::compute_capability(&config);
        let auto_port = config.auto_indexnode_port;
        tokio::spawn(async move {
            match fs2_core::transport::UdpAdvertTransport::bind(broadcast_addr).await {
                Ok(transport) => {
                    let node = Arc::new(fs2_client::auto_indexnode::AutoIndexnode::new(
                        Arc::new(transport),
                        capability,
                        auto_port,
                    ));
                    node.run(move || {
                        let listen: SocketAddr = ([0, 0, 0, 0], auto_port).into();
                        tokio::spawn(async move {
                            if let Err(e) = fs2_client::auto_indexnode::embed_indexnode(listen).await {
                                tracing::error!(error = %e, "failed to embed auto-indexnode");
                            }
                        });
                    })
                    .await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind auto-indexnode socket, election disabled");
                }
            }
        });
    }

    tracing::info!(addr = %client.listen_addr(), "fs2-client listening");
    let listener = tokio::net::TcpListener::bind(client.listen_addr()).await?;
    let router = fs2_client::http_server::build_router(client.http_state.clone());
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
