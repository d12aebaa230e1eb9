//! # Provchain Node
//!
//! Entry point for the `provchain-node` binary. Parses the CLI, initializes
//! logging, opens the durable store, joins the peer network, spawns the
//! background loops (peer health probe, periodic sync, auto-mining, chain
//! re-validation), and serves the HTTP API until SIGINT/SIGTERM.
//!
//! A node that starts with a corrupt or invalid local chain does not serve
//! writes until auto-heal has adopted a valid longer peer chain; reads and
//! `/status` stay available the whole time so operators can watch the heal.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use provchain_ledger::network::sync;
use provchain_ledger::{LedgerError, LedgerNode};

use provchain_node::api;
use provchain_node::cli::NodeCli;
use provchain_node::logging::{self, LogFormat};
use provchain_node::metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NodeCli::parse();
    let log_format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init_logging(
        &format!("provchain_node={0},provchain_ledger={0}", cli.log_level),
        log_format,
    );

    let config = cli.into_config();
    info!(
        port = config.port,
        difficulty = config.difficulty,
        db = %config.db_path.display(),
        keys = %config.keys_dir.display(),
        bootstrap = ?config.bootstrap,
        "starting provchain-node"
    );

    let port = config.port;
    let node = LedgerNode::open(config).context("failed to open ledger node")?;

    // Join the network, then heal a bad local chain before serving writes.
    sync::bootstrap(&node).await;
    if !node.is_valid() {
        match sync::auto_heal(&node).await {
            Ok(true) => info!("local chain healed from peers before serving"),
            Ok(false) => warn!("local chain still invalid, serving read-only until healed"),
            Err(LedgerError::NoHealthyPeers) => {
                warn!("local chain invalid and no peers reachable, serving read-only")
            }
            Err(e) => warn!(error = %e, "startup heal failed"),
        }
    }

    let metrics = Arc::new(NodeMetrics::new());
    let state = api::ApiState {
        node: Arc::clone(&node),
        metrics: Arc::clone(&metrics),
    };
    let router = api::create_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP API listening on {addr}");

    let tasks = spawn_background_tasks(&node, &metrics);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    for task in tasks {
        task.abort();
    }
    info!("provchain-node stopped");
    Ok(())
}

/// The node's four background loops. Each runs until aborted at shutdown.
fn spawn_background_tasks(
    node: &Arc<LedgerNode>,
    metrics: &Arc<NodeMetrics>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    // Peer health probing.
    {
        let node = Arc::clone(node);
        let metrics = Arc::clone(metrics);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config().health_interval);
            loop {
                ticker.tick().await;
                sync::probe_peers(&node).await;
                metrics.observe(&node);
            }
        }));
    }

    // Periodic longest-chain resolution.
    {
        let node = Arc::clone(node);
        let metrics = Arc::clone(metrics);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config().sync_interval);
            loop {
                ticker.tick().await;
                metrics.sync_rounds_total.inc();
                match sync::resolve_conflicts(&node).await {
                    Ok(outcome) if outcome.replaced => {
                        metrics.chain_replacements_total.inc();
                        info!(length = outcome.length, "periodic sync adopted a peer chain");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "periodic sync failed"),
                }
            }
        }));
    }

    // Auto-mining and mempool expiry.
    {
        let node = Arc::clone(node);
        let metrics = Arc::clone(metrics);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config().automine_interval);
            loop {
                ticker.tick().await;
                node.expire_mempool();
                if node.mempool().is_empty() {
                    continue;
                }
                match node.mine().await {
                    Ok(Some(block)) => {
                        metrics.blocks_mined_total.inc();
                        info!(index = block.index, "periodic mining sealed a block");
                    }
                    Ok(None) => {}
                    Err(LedgerError::MiningCancelled) => {}
                    Err(e) => warn!(error = %e, "periodic mining failed"),
                }
            }
        }));
    }

    // Chain re-validation with auto-heal.
    {
        let node = Arc::clone(node);
        let metrics = Arc::clone(metrics);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config().revalidate_interval);
            loop {
                ticker.tick().await;
                if node.revalidate().is_ok() {
                    continue;
                }
                metrics.sync_rounds_total.inc();
                match sync::auto_heal(&node).await {
                    Ok(true) => info!("auto-heal restored the chain"),
                    Ok(false) => warn!("auto-heal found no valid longer chain"),
                    Err(e) => warn!(error = %e, "auto-heal failed"),
                }
            }
        }));
    }

    tasks
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
