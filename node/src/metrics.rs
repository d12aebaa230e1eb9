//! # Prometheus Metrics
//!
//! Operational metrics served at `GET /metrics` in the text exposition
//! format. Registered in a dedicated registry so nothing collides with a
//! global default.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// All metric handles for the node. Handles are internally ref-counted, so
/// this struct clones cheaply.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Height of the local chain (block count).
    pub chain_length: IntGauge,
    /// Pending transactions in the mempool.
    pub mempool_size: IntGauge,
    /// Peers currently marked healthy.
    pub healthy_peers: IntGauge,
    /// Blocks sealed by this node's miner.
    pub blocks_mined_total: IntCounter,
    /// Peer blocks appended via gossip.
    pub blocks_received_total: IntCounter,
    /// Transactions that passed admission.
    pub transactions_admitted_total: IntCounter,
    /// Longest-chain resolution rounds attempted, adopted or not.
    pub sync_rounds_total: IntCounter,
    /// Longest-chain resolutions that replaced local state.
    pub chain_replacements_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers every metric. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("provchain".into()), None)
            .expect("failed to create prometheus registry");

        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::new(name, help).expect("metric creation");
            registry.register(Box::new(g.clone())).expect("metric registration");
            g
        }
        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("metric registration");
            c
        }

        Self {
            chain_length: gauge(&registry, "chain_length", "Blocks in the local chain"),
            mempool_size: gauge(&registry, "mempool_size", "Pending mempool transactions"),
            healthy_peers: gauge(&registry, "healthy_peers", "Peers currently marked healthy"),
            blocks_mined_total: counter(
                &registry,
                "blocks_mined_total",
                "Blocks sealed by the local miner",
            ),
            blocks_received_total: counter(
                &registry,
                "blocks_received_total",
                "Peer blocks appended via gossip",
            ),
            transactions_admitted_total: counter(
                &registry,
                "transactions_admitted_total",
                "Transactions that passed admission",
            ),
            sync_rounds_total: counter(
                &registry,
                "sync_rounds_total",
                "Longest-chain resolution rounds attempted",
            ),
            chain_replacements_total: counter(
                &registry,
                "chain_replacements_total",
                "Longest-chain resolutions that replaced local state",
            ),
            registry,
        }
    }

    /// Refreshes the gauges from live node state.
    pub fn observe(&self, node: &provchain_ledger::LedgerNode) {
        self.chain_length.set(node.chain_len() as i64);
        self.mempool_size.set(node.mempool().len() as i64);
        self.healthy_peers
            .set(node.peers().healthy_urls().len() as i64);
    }

    /// Encodes every registered metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics` handler.
pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<crate::api::ApiState>,
) -> impl IntoResponse {
    state.metrics.observe(&state.node);
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        ),
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
