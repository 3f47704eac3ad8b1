//! HTTP API server command.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

use bakery::api::state::ApiState;
use bakery::config::BakeryConfig;
use bakery::error::Error;
use bakery::{BakeformInventory, Result};

/// Start the HTTP API server.
#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Listen address.
    #[arg(short, long, env = "BAKERY_LISTEN")]
    listen: Option<String>,

    /// Bound on each HTTP request (e.g. "30m").
    #[arg(long, env = "BAKERY_REQUEST_TIMEOUT")]
    request_timeout: Option<String>,
}

impl ServeCmd {
    /// Run the serve command.
    pub fn run(self, mut config: BakeryConfig) -> Result<()> {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout;
        }

        let addr: SocketAddr = config.listen.parse().map_err(|e| {
            Error::config(format!("invalid listen address '{}': {}", config.listen, e))
        })?;
        let request_timeout = config.request_timeout()?;
        let inventory_config = config.validate()?;

        if unsafe { libc::geteuid() } != 0 {
            tracing::warn!("not running as root, partition mapping and mounting will likely fail");
        }

        let inventory = Arc::new(BakeformInventory::open(&inventory_config)?);
        tracing::info!(
            folder = %inventory.folder().display(),
            bakeforms = inventory.list().len(),
            "inventory loaded"
        );

        let runtime = tokio::runtime::Runtime::new().map_err(Error::Io)?;
        let served = runtime.block_on(run_server(inventory.clone(), addr, request_timeout));

        // Mount state is in-memory only; never exit with anything still mounted.
        if let Err(e) = inventory.unmount_all() {
            tracing::warn!(error = %e, "unmount on shutdown incomplete");
        }
        served
    }
}

async fn run_server(
    inventory: Arc<BakeformInventory>,
    addr: SocketAddr,
    request_timeout: std::time::Duration,
) -> Result<()> {
    let state = Arc::new(ApiState::new(inventory));
    let app = bakery::api::create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(Error::Io)?;

    tracing::info!(address = %addr, "starting HTTP API server");
    println!("bakery API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(Error::Io)?;

    tracing::info!("HTTP API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
