//! The client binary: forms onions and receives deliveries.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use calyx_cli::CommonArgs;
use calyx_core::core_client::Client;
use calyx_core::core_relay::metrics_router;
use calyx_core::metrics;
use calyx_core::shutdown::{install_signal_handlers, ShutdownCoordinator};

#[derive(Parser, Debug)]
#[command(name = "calyx-client")]
#[command(about = "Calyx client: sends fixed-length messages through the mix-net", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Unique client id
    #[arg(long)]
    id: u32,

    /// Host other nodes reach this client on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the client surface
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Port for the Prometheus scrape endpoint
    #[arg(long, default_value_t = 9000)]
    prometheus_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.common.init_logging()?;
    let config = args.common.load_config()?;

    let handle = metrics::install_recorder()?;
    let client = Client::new(
        args.id,
        args.host.clone(),
        args.port,
        args.prometheus_port,
        &config,
        handle.clone(),
    );

    let shutdown = Arc::new(ShutdownCoordinator::new());
    install_signal_handlers(Arc::clone(&shutdown));

    client.directory.register_client().await?;
    client.directory.register_intent_to_send(Vec::new()).await?;
    Arc::clone(&client.directory).spawn_heartbeat(shutdown.subscribe());

    let metrics_bind: SocketAddr = format!("0.0.0.0:{}", args.prometheus_port).parse()?;
    let metrics_app = metrics_router(handle);
    let metrics_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if let Ok(listener) = tokio::net::TcpListener::bind(metrics_bind).await {
            let _ = axum::serve(listener, metrics_app)
                .with_graceful_shutdown(async move { metrics_shutdown.wait_for_shutdown().await })
                .await;
        }
    });

    let bind: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    client.serve(bind, shutdown).await?;
    info!(id = args.id, "client stopped");
    Ok(())
}
