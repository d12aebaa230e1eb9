//! # Ledger Node
//!
//! [`LedgerNode`] is the top-level runtime entity: it owns the chain, the
//! mempool, the peer registry, the durable store, and the signature
//! verifier, and it drives admission, mining, and block receipt.
//!
//! ## Locking discipline
//!
//! - The chain sits behind one `RwLock`. Mining appends, block receipt, and
//!   chain replacement take the write lock; read endpoints take the read
//!   lock briefly and clone what they need.
//! - The mempool carries its own internal lock.
//! - A `tokio::sync::Mutex` serializes mining attempts — exactly one nonce
//!   search per node at a time. The proof-of-work itself runs on a blocking
//!   thread *without* holding the chain lock; staleness is re-checked under
//!   the write lock before the sealed block is appended.
//! - `mining_cancel` flips whenever the head moves, so an in-flight search
//!   abandons a candidate that no longer extends the head.
//!
//! While the local chain fails validation the node refuses writes
//! (`chain_valid = false` in `/status`) until auto-heal adopts a valid
//! longer peer chain.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chain::{BatchEvent, Block, Chain};
use crate::config::{now_timestamp, NodeConfig};
use crate::crypto::{Keystore, SignatureVerifier};
use crate::error::LedgerError;
use crate::mempool::Mempool;
use crate::miner;
use crate::network::{PeerClient, PeerRegistry};
use crate::semantics;
use crate::store::Store;
use crate::transaction::{Transaction, TxKey};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The `/status` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub chain_length: usize,
    pub chain_valid: bool,
    pub validation_message: String,
    pub peers: usize,
    pub mempool_size: usize,
    pub difficulty: usize,
}

/// Outcome of processing a gossiped block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReceipt {
    /// The block extended the local head exactly and was appended.
    Appended,
    /// The block belongs to a different head; run chain resolution.
    Fork,
}

/// The `/verify/{batch_id}` payload.
#[derive(Debug, Clone, Serialize)]
pub struct BatchVerification {
    pub batch_id: String,
    pub verified: bool,
    pub events: Vec<BatchEvent>,
    pub message: String,
}

#[derive(Debug, Clone)]
struct Validity {
    valid: bool,
    message: String,
}

// ---------------------------------------------------------------------------
// LedgerNode
// ---------------------------------------------------------------------------

/// One full ledger replica.
pub struct LedgerNode {
    config: NodeConfig,
    store: Store,
    chain: RwLock<Chain>,
    mempool: Mempool,
    peers: PeerRegistry,
    client: PeerClient,
    verifier: SignatureVerifier,
    mining_slot: tokio::sync::Mutex<()>,
    mining_cancel: Arc<AtomicBool>,
    validity: RwLock<Validity>,
}

impl LedgerNode {
    /// Opens the durable store, reloads (or creates) the chain, validates
    /// it, and wires up the runtime.
    ///
    /// A corrupt or invalid stored chain does not abort startup: the node
    /// comes up with `chain_valid = false`, refuses writes, and waits for
    /// auto-heal to adopt a valid peer chain.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, LedgerError> {
        let store = Store::open(&config.db_path)?;
        let keystore =
            Keystore::open(&config.keys_dir).map_err(|e| LedgerError::Persistence(e.to_string()))?;
        let verifier = SignatureVerifier::new(keystore, config.require_signatures);
        let client = PeerClient::new(config.peer_timeout)
            .map_err(|e| LedgerError::Persistence(format!("http client: {e}")))?;

        let (chain, load_failure) = match store.load_chain() {
            Ok(blocks) if blocks.is_empty() => {
                let chain = Chain::genesis();
                store.append_block(chain.head())?;
                info!("created genesis block");
                (chain, None)
            }
            Ok(blocks) => (Chain::from_blocks(blocks), None),
            Err(e) => {
                warn!(error = %e, "stored chain is unreadable, awaiting auto-heal");
                (Chain::genesis(), Some(e.to_string()))
            }
        };

        let peers = PeerRegistry::new(config.self_url());
        for url in store.load_peers()? {
            peers.register(&url);
        }

        let mempool = Mempool::new(config.mempool_cap);
        let node = Arc::new(Self {
            config,
            store,
            chain: RwLock::new(chain),
            mempool,
            peers,
            client,
            verifier,
            mining_slot: tokio::sync::Mutex::new(()),
            mining_cancel: Arc::new(AtomicBool::new(false)),
            validity: RwLock::new(Validity {
                valid: true,
                message: "Chain is valid".to_string(),
            }),
        });

        match load_failure {
            Some(message) => node.set_validity(false, format!("persistence error: {message}")),
            None => {
                let _ = node.revalidate();
            }
        }

        Ok(node)
    }

    // -- Accessors -----------------------------------------------------------

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn chain_len(&self) -> usize {
        self.chain.read().len()
    }

    /// A full copy of the chain's blocks for serving `/chain`.
    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    pub fn is_valid(&self) -> bool {
        self.validity.read().valid
    }

    /// Current `(chain_valid, validation_message)` pair.
    pub fn validity(&self) -> (bool, String) {
        let v = self.validity.read();
        (v.valid, v.message.clone())
    }

    fn set_validity(&self, valid: bool, message: impl Into<String>) {
        let mut v = self.validity.write();
        v.valid = valid;
        v.message = message.into();
    }

    // -- Peers ---------------------------------------------------------------

    /// Registers a peer and persists it. Returns whether it was new.
    pub fn add_peer(&self, url: &str) -> Result<bool, LedgerError> {
        match self.peers.register(url) {
            Some(normalized) => {
                self.store.add_peer(&normalized)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -- Admission -----------------------------------------------------------

    /// The full admission pipeline, in order: write-refusal while invalid,
    /// shape, signature + identity, duplication, batch semantics. A
    /// transaction that passes lands in the mempool untouched.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        {
            let v = self.validity.read();
            if !v.valid {
                return Err(LedgerError::ChainInvalid(v.message.clone()));
            }
        }

        tx.validate_shape()?;
        self.verifier.verify(&tx)?;

        let key = tx.key();
        {
            let chain = self.chain.read();
            if chain.contains(&key) {
                return Err(LedgerError::DuplicateTransaction(format!(
                    "{key} is already sealed in the chain"
                )));
            }
            if self.mempool.contains(&key) {
                return Err(LedgerError::DuplicateTransaction(format!(
                    "{key} is already pending"
                )));
            }

            let history = chain.batch_transactions(&tx.batch_id);
            let pending = self.mempool.batch_transactions(&tx.batch_id);
            semantics::validate_admission(&history, &pending, &tx)?;
        }

        let (batch, action, actor) = (tx.batch_id.clone(), tx.action, tx.actor.clone());
        self.mempool.insert(tx)?;
        info!(batch = %batch, action = %action, actor = %actor, "transaction admitted");
        Ok(())
    }

    /// Whether the mempool has grown past the auto-mine threshold.
    pub fn should_auto_mine(&self) -> bool {
        self.mempool.len() >= self.config.mine_threshold
    }

    /// Expires stale mempool entries, logging each eviction. Property: no
    /// transaction leaves the pool without either a block or a log line.
    pub fn expire_mempool(&self) -> usize {
        let expired = self.mempool.expire_older_than(self.config.tx_ttl);
        for tx in &expired {
            warn!(key = %tx.key(), "pending transaction expired by TTL, dropping");
        }
        expired.len()
    }

    // -- Mining --------------------------------------------------------------

    /// Runs one mining attempt: snapshot the mempool, search for a nonce on
    /// a blocking thread, and append atomically if the head has not moved.
    ///
    /// Returns `Ok(None)` when there is nothing to mine. Broadcast to peers
    /// is initiated before the mining slot is released; delivery completes
    /// asynchronously.
    pub async fn mine(&self) -> Result<Option<Block>, LedgerError> {
        let _slot = self.mining_slot.lock().await;
        self.mining_cancel.store(false, Ordering::Relaxed);

        let (next_index, prev_hash) = {
            let chain = self.chain.read();
            (chain.head().index + 1, chain.head().hash.clone())
        };

        // Snapshot in insertion order, dropping anything a peer block
        // sealed while it sat in our pool.
        let snapshot: Vec<Transaction> = {
            let chain = self.chain.read();
            self.mempool
                .snapshot(self.config.max_block_txs)
                .into_iter()
                .filter(|tx| !chain.contains(&tx.key()))
                .collect()
        };
        if snapshot.is_empty() {
            return Ok(None);
        }

        let candidate = Block::candidate(next_index, now_timestamp(), snapshot, prev_hash.clone());
        let difficulty = self.config.difficulty;
        let cancel = Arc::clone(&self.mining_cancel);
        let sealed =
            tokio::task::spawn_blocking(move || miner::seal(candidate, difficulty, &cancel))
                .await
                .map_err(|e| LedgerError::Persistence(format!("mining task panicked: {e}")))??;

        {
            let mut chain = self.chain.write();
            if chain.head().hash != prev_hash {
                // A peer block landed while we were searching; the snapshot
                // transactions stay pending for the next round.
                return Err(LedgerError::MiningCancelled);
            }
            self.store.append_block(&sealed)?;
            chain.push(sealed.clone());
        }

        let included: HashSet<TxKey> = sealed.transactions.iter().map(|t| t.key()).collect();
        self.mempool.remove_included(&included);

        info!(
            index = sealed.index,
            nonce = sealed.nonce,
            transactions = sealed.transactions.len(),
            hash = %sealed.hash,
            "block mined"
        );

        // Gossip starts while we still hold the mining slot.
        crate::network::sync::spawn_block_broadcast(
            self.client.clone(),
            self.peers.clone(),
            sealed.clone(),
        );

        Ok(Some(sealed))
    }

    // -- Block receipt -------------------------------------------------------

    /// Processes a block gossiped by a peer.
    ///
    /// Appends iff it extends the local head exactly and survives hash,
    /// proof-of-work, signature, duplication, and semantic checks. A block
    /// on any other head yields [`BlockReceipt::Fork`] so the caller can
    /// trigger full chain resolution.
    pub fn receive_block(&self, block: Block) -> Result<BlockReceipt, LedgerError> {
        if !block.hash_is_consistent() {
            return Err(LedgerError::BadRequest(
                "block hash does not match contents".into(),
            ));
        }
        if !block.meets_difficulty(self.config.difficulty) {
            return Err(LedgerError::BadRequest(
                "block does not meet proof-of-work difficulty".into(),
            ));
        }

        let mut chain = self.chain.write();
        let head = chain.head();
        if block.previous_hash != head.hash || block.index != head.index + 1 {
            info!(
                incoming = block.index,
                head = head.index,
                "gossiped block does not extend head"
            );
            return Ok(BlockReceipt::Fork);
        }

        for tx in &block.transactions {
            self.verifier.verify(tx)?;
            if chain.contains(&tx.key()) {
                return Err(LedgerError::BadRequest(format!(
                    "block repeats sealed transaction {}",
                    tx.key()
                )));
            }
        }
        if let Err(detail) = semantics::replay(chain.transactions().chain(block.transactions.iter()))
        {
            return Err(LedgerError::BadRequest(format!(
                "block breaks batch ordering: {detail}"
            )));
        }

        self.store.append_block(&block)?;
        chain.push(block.clone());
        self.mining_cancel.store(true, Ordering::Relaxed);
        drop(chain);

        let included: HashSet<TxKey> = block.transactions.iter().map(|t| t.key()).collect();
        let drained = self.mempool.remove_included(&included);
        info!(
            index = block.index,
            drained, "peer block appended"
        );

        Ok(BlockReceipt::Appended)
    }

    // -- Chain replacement ---------------------------------------------------

    /// Swaps in an already-validated, strictly longer chain: persist, then
    /// replace in memory, cancel any in-flight mining, restore validity,
    /// and drain newly sealed transactions from the mempool.
    pub fn replace_chain(&self, new_chain: Chain) -> Result<usize, LedgerError> {
        let length = new_chain.len();
        self.store.replace_chain(new_chain.blocks())?;
        {
            let mut chain = self.chain.write();
            *chain = new_chain;
        }
        self.mining_cancel.store(true, Ordering::Relaxed);
        self.set_validity(true, "Chain is valid");

        let sealed: HashSet<TxKey> = {
            let chain = self.chain.read();
            chain.transactions().map(|t| t.key()).collect()
        };
        self.mempool.remove_included(&sealed);

        info!(length, "adopted replacement chain");
        Ok(length)
    }

    // -- Validation ----------------------------------------------------------

    /// Re-validates the local chain end to end and updates the published
    /// validity flag. Invalid chains leave the node refusing writes.
    pub fn revalidate(&self) -> Result<(), LedgerError> {
        let result = {
            let chain = self.chain.read();
            chain.validate(self.config.difficulty, Some(&self.verifier))
        };
        match result {
            Ok(()) => {
                self.set_validity(true, "Chain is valid");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "local chain failed validation");
                self.set_validity(false, e.to_string());
                Err(e.into())
            }
        }
    }

    // -- Queries -------------------------------------------------------------

    pub fn status(&self) -> NodeStatus {
        let (chain_valid, validation_message) = self.validity();
        NodeStatus {
            chain_length: self.chain_len(),
            chain_valid,
            validation_message,
            peers: self.peers.len(),
            mempool_size: self.mempool.len(),
            difficulty: self.config.difficulty,
        }
    }

    /// Sealed events for a batch in chain order.
    pub fn history(&self, batch_id: &str) -> Vec<BatchEvent> {
        self.chain.read().history(batch_id)
    }

    /// Provenance check: the chain must validate, the batch must exist, and
    /// its action sequence must be a legal walk of the ladder.
    pub fn verify_batch(&self, batch_id: &str) -> BatchVerification {
        let (chain_valid, validation_message) = self.validity();
        let events = self.history(batch_id);
        let actions: Vec<_> = events.iter().map(|e| e.transaction.action).collect();
        let path_ok = semantics::is_valid_path(&actions);

        let (verified, message) = if !chain_valid {
            (false, validation_message)
        } else if events.is_empty() {
            (false, format!("No transactions found for batch {batch_id}"))
        } else if !path_ok {
            (false, format!("Batch {batch_id} violates action ordering"))
        } else {
            (true, "Chain is valid".to_string())
        };

        BatchVerification {
            batch_id: batch_id.to_string(),
            verified,
            events,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
