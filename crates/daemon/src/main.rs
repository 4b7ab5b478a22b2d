use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polaris_daemon::{DaemonConfig, Manager};

#[derive(Parser, Debug)]
#[command(name = "polarisd")]
#[command(about = "Publisher bridge daemon for the Polaris price oracle")]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long, default_value = "polarisd.toml")]
    config: PathBuf,

    /// Override the validator RPC host
    #[arg(short, long)]
    rpc_host: Option<String>,

    /// Override the local publisher listen port
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Override the key directory
    #[arg(short, long)]
    key_dir: Option<PathBuf>,

    /// Write every account update to the capture file
    #[arg(long)]
    capture: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = DaemonConfig::load(&args.config)?;
    if let Some(host) = args.rpc_host {
        cfg.rpc_host = host;
    }
    if let Some(port) = args.listen_port {
        cfg.listen_port = port;
    }
    if let Some(dir) = args.key_dir {
        cfg.key_dir = dir;
    }
    if args.capture {
        cfg.capture.enabled = true;
    }

    let mut manager = Manager::init(cfg).await?;
    manager.bootstrap().await;
    info!("ready");

    loop {
        tokio::select! {
            _ = manager.poll(true) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    manager.teardown();
    Ok(())
}
