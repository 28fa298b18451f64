//! Supervisor binary: wire the controller to the real services and run
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxy_supervisor::config::ConfigStore;
use proxy_supervisor::controller::ProxyLifecycleController;
use proxy_supervisor::pac::PacDocumentServer;
use proxy_supervisor::services::{DesktopProxyAdapter, HttpAdapterProcess, TcpRelayService};

#[derive(Parser, Debug)]
#[command(name = "proxy-supervisor", about = "Local proxy-client supervisor")]
struct Args {
    /// Path of the persisted configuration file.
    #[arg(long, default_value = "gui-config.json")]
    config: PathBuf,

    /// Path of the PAC document.
    #[arg(long, default_value = "proxy.pac")]
    pac_file: PathBuf,

    /// Rule list URL; defaults to the public gfwlist mirror.
    #[arg(long)]
    rules_url: Option<String>,

    /// HTTP proxy adapter command; "{port}" is replaced with the
    /// configured port.
    #[arg(
        long,
        default_value = "polipo proxyAddress=127.0.0.1 proxyPort={port}"
    )]
    http_proxy_cmd: String,

    /// Fetch the rule list once at startup.
    #[arg(long)]
    update_rules: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_supervisor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("proxy-supervisor v0.1.0 starting");

    let pac = Arc::new(PacDocumentServer::new(&args.pac_file));
    pac.ensure_backing_file()?;

    let http_cmd: Vec<String> = args
        .http_proxy_cmd
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let controller = ProxyLifecycleController::new(
        ConfigStore::new(&args.config),
        pac,
        Arc::new(TcpRelayService::new()),
        Arc::new(HttpAdapterProcess::new(http_cmd)),
        Arc::new(DesktopProxyAdapter::new()),
    );
    if let Some(url) = args.rules_url {
        controller.set_rules_url(url);
    }

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(?event, "Controller event");
        }
    });

    controller.start();
    if args.update_rules {
        controller.update_rule_list();
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    controller.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
