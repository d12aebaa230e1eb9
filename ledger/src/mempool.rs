//! # Mempool
//!
//! The node-local pool of admitted, not-yet-mined transactions. Entries
//! keep strict insertion order — the order they entered the pool is the
//! order they appear inside a block. Identity is the transaction's signed
//! fields, so the same signed event can never be pending twice.
//!
//! The pool is bounded. At the hard cap the oldest *unsigned* entry is
//! evicted to make room; signed valid entries are never dropped silently —
//! they leave only by block inclusion or TTL expiry, and expiry is logged.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::LedgerError;
use crate::transaction::{Transaction, TxKey};

struct PoolEntry {
    tx: Transaction,
    added_at: Instant,
}

/// Insertion-ordered, bounded transaction pool. Thread-safe.
pub struct Mempool {
    entries: Mutex<Vec<PoolEntry>>,
    cap: usize,
}

impl Mempool {
    /// Creates a pool holding at most `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Admits a transaction the node has already validated.
    ///
    /// Fails with `DuplicateTransaction` if the same signed event is
    /// already pending, and with `BadRequest` if the pool is at capacity
    /// and nothing is evictable.
    pub fn insert(&self, tx: Transaction) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();

        let key = tx.key();
        if entries.iter().any(|e| e.tx.key() == key) {
            return Err(LedgerError::DuplicateTransaction(key.to_string()));
        }

        if entries.len() >= self.cap {
            // Make room by dropping the oldest unsigned entry, if any.
            match entries.iter().position(|e| !e.tx.is_signed()) {
                Some(pos) => {
                    let evicted = entries.remove(pos);
                    warn!(
                        key = %evicted.tx.key(),
                        "mempool at capacity, evicting oldest unsigned transaction"
                    );
                }
                None => {
                    return Err(LedgerError::BadRequest(format!(
                        "mempool is full ({} transactions)",
                        self.cap
                    )));
                }
            }
        }

        entries.push(PoolEntry {
            tx,
            added_at: Instant::now(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether a transaction with this identity is pending.
    pub fn contains(&self, key: &TxKey) -> bool {
        self.entries.lock().iter().any(|e| &e.tx.key() == key)
    }

    /// The first `max` pending transactions in insertion order. This is the
    /// miner's snapshot — the pool itself is not modified.
    pub fn snapshot(&self, max: usize) -> Vec<Transaction> {
        self.entries
            .lock()
            .iter()
            .take(max)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Every pending transaction, in insertion order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.lock().iter().map(|e| e.tx.clone()).collect()
    }

    /// Pending transactions for one batch, in insertion order.
    pub fn batch_transactions(&self, batch_id: &str) -> Vec<Transaction> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.tx.batch_id == batch_id)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Drops every pending transaction whose identity is in `included`.
    /// Called after a block is sealed locally or accepted from a peer.
    pub fn remove_included(&self, included: &HashSet<TxKey>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !included.contains(&e.tx.key()));
        before - entries.len()
    }

    /// Expires entries older than `ttl`, returning the evicted transactions
    /// so the caller can log each one.
    pub fn expire_older_than(&self, ttl: Duration) -> Vec<Transaction> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        entries.retain(|e| {
            if e.added_at.elapsed() > ttl {
                expired.push(e.tx.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
