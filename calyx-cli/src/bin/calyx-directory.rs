//! The directory (bulletin board) binary.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use calyx_cli::CommonArgs;
use calyx_core::core_directory::{self, Directory};
use calyx_core::shutdown::{install_signal_handlers, ShutdownCoordinator};

#[derive(Parser, Debug)]
#[command(name = "calyx-directory")]
#[command(about = "Calyx directory: node registration and run coordination", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory for persisted state (roster, prometheus.yml)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Re-prompt nodes from the persisted roster to register
    #[arg(long)]
    use_last_registered: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.common.init_logging()?;
    let config = args.common.load_config()?;

    let bind: SocketAddr = format!("0.0.0.0:{}", config.bulletin_board.port).parse()?;
    let directory = Directory::new(config, &args.data_dir);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    install_signal_handlers(Arc::clone(&shutdown));

    if args.use_last_registered {
        directory.prompt_registered_nodes().await;
    }

    tokio::spawn(Arc::clone(&directory).run_protocol_loop(Arc::clone(&shutdown)));

    core_directory::serve(directory, bind, shutdown).await?;
    info!("directory stopped");
    Ok(())
}
