use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use bos_server::{instance, ServerManager, ServerManagerDeps, ServerOverrides};

/// BrowserOS server supervisor - runs the sidecar server lifecycle
/// standalone (launch, health monitoring, auto-restart, stable MCP/CDP
/// ports).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the bundled server binary and resources
    #[arg(long, value_name = "DIR")]
    install_dir: PathBuf,

    /// Data directory for prefs, state records and the instance lock
    /// (defaults to the platform data dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the CDP bridge port
    #[arg(long)]
    cdp_port: Option<u16>,

    /// Override the stable MCP proxy port
    #[arg(long)]
    mcp_port: Option<u16>,

    /// Override the agent endpoint port
    #[arg(long)]
    agent_port: Option<u16>,

    /// Override the extension endpoint port
    #[arg(long)]
    extension_port: Option<u16>,

    /// Override the server resources directory
    #[arg(long, value_name = "DIR")]
    resources_dir: Option<PathBuf>,

    /// Do not launch the server (ports still resolve and persist)
    #[arg(long)]
    disable_server: bool,

    /// Ignore downloaded server updates; always use the bundled binary
    #[arg(long)]
    disable_updater: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug);

    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine a data directory"))?
            .join("browseros"),
    };

    info!("Starting BrowserOS server supervisor");
    info!("Install dir: {}", args.install_dir.display());
    info!("Data dir: {}", data_dir.display());

    let overrides = ServerOverrides {
        cdp_port: args.cdp_port,
        mcp_port: args.mcp_port,
        agent_port: args.agent_port,
        extension_port: args.extension_port,
        resources_dir: args.resources_dir.clone(),
        disable_server: args.disable_server,
        disable_updater: args.disable_updater,
    };

    let deps = ServerManagerDeps::production(&args.install_dir, &data_dir, overrides);
    let manager = ServerManager::new(deps);
    instance::install(manager.clone());

    manager.start().await;

    if manager.is_running().await {
        let ports = manager.ports().await;
        info!(
            "Server up: mcp={} cdp={} server={} extension={} agent={}",
            ports.proxy, ports.cdp, ports.server, ports.extension, ports.agent
        );
    } else if args.disable_server {
        info!("Server launch disabled; supervisor idle");
    } else {
        error!("Server did not start; supervisor will keep retrying");
    }

    wait_for_shutdown_signal().await;

    info!("Shutting down server supervisor...");
    instance::teardown().await;
    info!("Server supervisor shut down");

    Ok(())
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Signal wait failed: {}", e);
                }
                info!("Received interrupt");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
