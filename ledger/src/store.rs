//! # Store — Durable Persistence
//!
//! sled-backed storage with two trees, the ledger's "two small tables":
//!
//! | Tree    | Key                  | Value                        |
//! |---------|----------------------|------------------------------|
//! | `chain` | block index (8B BE)  | canonical JSON of the block  |
//! | `peers` | peer URL (UTF-8)     | empty                        |
//!
//! Big-endian indices make sled's lexicographic key order equal numeric
//! order, so a plain scan reloads the chain in index order. Each sealed
//! block is one insert followed by a flush — either the block is durable
//! or the in-memory append is rolled back by the caller.
//!
//! A block that fails to decode at load time is a corruption signal; the
//! caller responds by healing from peers before serving traffic.

use std::path::Path;

use tracing::info;

use crate::canonical;
use crate::chain::Block;
use crate::error::LedgerError;

/// Persistent storage for blocks and the registered peer set.
#[derive(Debug, Clone)]
pub struct Store {
    db: sled::Db,
    chain: sled::Tree,
    peers: sled::Tree,
}

impl Store {
    /// Opens or creates the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An in-memory database for tests; removed on drop.
    pub fn open_temporary() -> Result<Self, LedgerError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, LedgerError> {
        let chain = db.open_tree("chain")?;
        let peers = db.open_tree("peers")?;
        Ok(Self { db, chain, peers })
    }

    // -- Chain ---------------------------------------------------------------

    /// Reloads the full chain in index order.
    ///
    /// Returns an empty vector for a fresh database. A row that fails to
    /// decode is reported as a persistence error — corrupted state must not
    /// be silently skipped.
    pub fn load_chain(&self) -> Result<Vec<Block>, LedgerError> {
        let mut blocks = Vec::with_capacity(self.chain.len());
        for row in self.chain.iter() {
            let (key, value) = row?;
            let block: Block = serde_json::from_slice(&value).map_err(|e| {
                LedgerError::Persistence(format!(
                    "corrupt block row {:?}: {e}",
                    key.as_ref()
                ))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Persists one sealed block. Flushes before returning so a crash after
    /// this call cannot lose the block.
    pub fn append_block(&self, block: &Block) -> Result<(), LedgerError> {
        let bytes = canonical::to_canonical_bytes(block)?;
        self.chain.insert(block.index.to_be_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically swaps the stored chain for a new one (chain replacement
    /// after longest-chain resolution or auto-heal).
    pub fn replace_chain(&self, blocks: &[Block]) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        for block in blocks {
            let bytes = canonical::to_canonical_bytes(block)?;
            batch.insert(block.index.to_be_bytes().to_vec(), bytes);
        }
        self.chain.clear()?;
        self.chain.apply_batch(batch)?;
        self.db.flush()?;
        info!(length = blocks.len(), "stored chain replaced");
        Ok(())
    }

    /// Number of persisted blocks.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    // -- Peers ---------------------------------------------------------------

    /// Every registered peer URL.
    pub fn load_peers(&self) -> Result<Vec<String>, LedgerError> {
        let mut peers = Vec::new();
        for row in self.peers.iter() {
            let (key, _) = row?;
            let url = String::from_utf8(key.to_vec())
                .map_err(|e| LedgerError::Persistence(format!("corrupt peer row: {e}")))?;
            peers.push(url);
        }
        Ok(peers)
    }

    pub fn add_peer(&self, url: &str) -> Result<(), LedgerError> {
        self.peers.insert(url.as_bytes(), &[])?;
        self.db.flush()?;
        Ok(())
    }

    pub fn remove_peer(&self, url: &str) -> Result<(), LedgerError> {
        self.peers.remove(url.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
