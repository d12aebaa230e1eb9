//! # Sync & Consensus
//!
//! Longest-valid-chain resolution, block and transaction gossip, auto-heal,
//! and recursive bootstrap discovery. The rule is deliberately small:
//!
//! > Adopt a peer chain iff it is strictly longer than the local chain AND
//! > every invariant validates. Ties keep the local chain.
//!
//! Auto-heal is the same resolution run on a node whose own chain failed
//! validation — if some peer holds a valid longer chain it replaces local
//! state; otherwise the node stays read-only (`chain_valid = false`) and
//! keeps trying.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::client::{BlockDelivery, PeerClient};
use super::peers::{normalize_url, PeerRegistry};
use crate::chain::{Block, Chain};
use crate::config::DISCOVERY_DEPTH;
use crate::error::LedgerError;
use crate::node::LedgerNode;
use crate::transaction::Transaction;

/// Result of one resolution round.
#[derive(Debug, Clone, Copy)]
pub struct SyncOutcome {
    /// Whether a peer chain replaced local state.
    pub replaced: bool,
    /// Chain length after the round.
    pub length: usize,
}

// ---------------------------------------------------------------------------
// Longest-valid-chain resolution
// ---------------------------------------------------------------------------

/// Asks every healthy peer for its chain and adopts the longest strictly
/// longer candidate that validates in full.
///
/// Peers that fail to answer are marked unhealthy; peers serving invalid
/// chains are logged and skipped. Never errors on an isolated node — no
/// peers simply means nothing to adopt.
pub async fn resolve_conflicts(node: &LedgerNode) -> Result<SyncOutcome, LedgerError> {
    let local_len = node.chain_len();
    let mut best: Option<Chain> = None;

    for peer in node.peers().healthy_urls() {
        let blocks = match node.client().fetch_chain(&peer).await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(peer = %peer, error = %e, "chain fetch failed");
                node.peers().mark(&peer, false);
                continue;
            }
        };

        let candidate = Chain::from_blocks(blocks);
        let bar = best.as_ref().map(Chain::len).unwrap_or(local_len);
        if candidate.len() <= bar {
            debug!(peer = %peer, length = candidate.len(), "candidate not strictly longer");
            continue;
        }

        match candidate.validate(node.config().difficulty, Some(node.verifier())) {
            Ok(()) => best = Some(candidate),
            Err(e) => warn!(peer = %peer, error = %e, "peer chain is invalid, skipping"),
        }
    }

    match best {
        Some(chain) => {
            let length = node.replace_chain(chain)?;
            info!(length, "longest-chain resolution adopted a peer chain");
            Ok(SyncOutcome {
                replaced: true,
                length,
            })
        }
        None => Ok(SyncOutcome {
            replaced: false,
            length: local_len,
        }),
    }
}

/// Resolution for a node whose own chain failed validation. Returns whether
/// a peer chain healed it; when no peer can help, the node stays invalid
/// and keeps refusing writes.
pub async fn auto_heal(node: &LedgerNode) -> Result<bool, LedgerError> {
    if node.is_valid() {
        return Ok(false);
    }
    if node.peers().healthy_urls().is_empty() {
        warn!("chain invalid and no healthy peers to heal from");
        return Err(LedgerError::NoHealthyPeers);
    }

    let outcome = resolve_conflicts(node).await?;
    if outcome.replaced {
        info!(length = outcome.length, "auto-heal replaced the corrupted chain");
    } else {
        warn!("auto-heal found no valid longer chain, node stays read-only");
    }
    Ok(outcome.replaced)
}

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Pushes a freshly sealed block to every healthy peer. A `Fork` answer is
/// the peer's business — it resolves against us; we only log it.
pub async fn broadcast_block(client: &PeerClient, peers: &PeerRegistry, block: &Block) {
    for peer in peers.healthy_urls() {
        match client.send_block(&peer, block).await {
            Ok(BlockDelivery::Accepted) => {
                debug!(peer = %peer, index = block.index, "block delivered")
            }
            Ok(BlockDelivery::Fork) => {
                info!(peer = %peer, index = block.index, "peer reported fork")
            }
            Ok(BlockDelivery::Rejected(status)) => {
                warn!(peer = %peer, %status, "peer rejected block")
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "block delivery failed");
                peers.mark(&peer, false);
            }
        }
    }
}

/// Fire-and-forget block broadcast. The miner calls this while it still
/// holds the mining slot, so the attempt is initiated before the slot is
/// released; delivery completes asynchronously.
pub fn spawn_block_broadcast(client: PeerClient, peers: PeerRegistry, block: Block) {
    tokio::spawn(async move {
        broadcast_block(&client, &peers, &block).await;
    });
}

/// Pushes an admitted transaction to every healthy peer.
pub async fn broadcast_transaction(client: &PeerClient, peers: &PeerRegistry, tx: &Transaction) {
    for peer in peers.healthy_urls() {
        if let Err(e) = client.send_transaction(&peer, tx).await {
            warn!(peer = %peer, error = %e, "transaction gossip failed");
            peers.mark(&peer, false);
        }
    }
}

/// Fire-and-forget transaction gossip.
pub fn spawn_transaction_broadcast(client: PeerClient, peers: PeerRegistry, tx: Transaction) {
    tokio::spawn(async move {
        broadcast_transaction(&client, &peers, &tx).await;
    });
}

// ---------------------------------------------------------------------------
// Health probing
// ---------------------------------------------------------------------------

/// Probes every registered peer once and updates its health flag. Peers are
/// never removed — an unhealthy peer keeps being probed and recovers on the
/// first successful answer.
pub async fn probe_peers(node: &LedgerNode) {
    for peer in node.peers().urls() {
        let healthy = node.client().probe(&peer).await;
        node.peers().mark(&peer, healthy);
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Joins the network through the configured bootstrap URLs: register with
/// each, pull its peer list, and walk outward breadth-first up to
/// [`DISCOVERY_DEPTH`] hops. Every discovered peer learns about us too.
pub async fn bootstrap(node: &LedgerNode) {
    let self_url = node.config().self_url();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(normalize_url(&self_url));

    let mut frontier: Vec<String> = node
        .config()
        .bootstrap
        .iter()
        .map(|url| normalize_url(url))
        .filter(|url| seen.insert(url.clone()))
        .collect();

    if frontier.is_empty() {
        info!("no bootstrap peers configured, running standalone");
        return;
    }

    for hop in 0..=DISCOVERY_DEPTH {
        let mut next = Vec::new();
        for peer in frontier.drain(..) {
            if let Err(e) = node.add_peer(&peer) {
                warn!(peer = %peer, error = %e, "failed to persist peer");
            }
            if let Err(e) = node.client().register_node(&peer, &self_url).await {
                warn!(peer = %peer, error = %e, "bootstrap registration failed");
                node.peers().mark(&peer, false);
                continue;
            }

            if hop < DISCOVERY_DEPTH {
                match node.client().fetch_peers(&peer).await {
                    Ok(discovered) => {
                        for url in discovered {
                            let url = normalize_url(&url);
                            if seen.insert(url.clone()) {
                                next.push(url);
                            }
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "peer discovery failed"),
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    info!(peers = node.peers().len(), "bootstrap complete");
}
