//! # Peer Client
//!
//! Thin HTTP client for node-to-node calls. Every request carries the
//! configured per-call timeout; transport failures surface as [`PeerError`]
//! and the sync layer decides what they mean (usually: mark the peer
//! unhealthy and move on).

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Block;
use crate::transaction::Transaction;

/// Failures talking to a single peer.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer answered {0}")]
    Status(StatusCode),
}

impl PeerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PeerError::Transport(e) if e.is_timeout())
    }
}

/// How a peer responded to a gossiped block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDelivery {
    /// The peer appended the block to its chain.
    Accepted,
    /// The peer is on a different head and will run chain resolution.
    Fork,
    /// The peer rejected the block as invalid.
    Rejected(StatusCode),
}

#[derive(Deserialize)]
struct ChainEnvelope {
    chain: Vec<Block>,
}

#[derive(Deserialize)]
struct NodesEnvelope {
    nodes: Vec<String>,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    url: &'a str,
}

/// HTTP client for the ledger's peer protocol.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    /// Builds a client whose every call is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// `GET /status` — returns whether the peer answered at all.
    pub async fn probe(&self, base: &str) -> bool {
        match self.http.get(format!("{base}/status")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// `GET /chain` — the peer's full chain, unvalidated.
    pub async fn fetch_chain(&self, base: &str) -> Result<Vec<Block>, PeerError> {
        let resp = self.http.get(format!("{base}/chain")).send().await?;
        if !resp.status().is_success() {
            return Err(PeerError::Status(resp.status()));
        }
        Ok(resp.json::<ChainEnvelope>().await?.chain)
    }

    /// `GET /nodes` — the peer's known peer URLs.
    pub async fn fetch_peers(&self, base: &str) -> Result<Vec<String>, PeerError> {
        let resp = self.http.get(format!("{base}/nodes")).send().await?;
        if !resp.status().is_success() {
            return Err(PeerError::Status(resp.status()));
        }
        Ok(resp.json::<NodesEnvelope>().await?.nodes)
    }

    /// `POST /register-node` — introduces `self_url` to the peer.
    pub async fn register_node(&self, base: &str, self_url: &str) -> Result<(), PeerError> {
        let resp = self
            .http
            .post(format!("{base}/register-node"))
            .json(&RegisterBody { url: self_url })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PeerError::Status(resp.status()));
        }
        Ok(())
    }

    /// `POST /receive-block` — gossips a freshly sealed block.
    pub async fn send_block(&self, base: &str, block: &Block) -> Result<BlockDelivery, PeerError> {
        let resp = self
            .http
            .post(format!("{base}/receive-block"))
            .json(block)
            .send()
            .await?;
        Ok(match resp.status() {
            status if status.is_success() => BlockDelivery::Accepted,
            StatusCode::CONFLICT => BlockDelivery::Fork,
            status => BlockDelivery::Rejected(status),
        })
    }

    /// `POST /receive-transaction` — gossips an admitted transaction.
    pub async fn send_transaction(&self, base: &str, tx: &Transaction) -> Result<(), PeerError> {
        let resp = self
            .http
            .post(format!("{base}/receive-transaction"))
            .json(tx)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PeerError::Status(resp.status()));
        }
        Ok(())
    }
}
