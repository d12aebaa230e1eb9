//! # Block Structure
//!
//! A block is the sealed unit of the ledger: an ordered list of signed
//! transactions, a link to the previous block, and a proof-of-work nonce.
//!
//! ## Hash Computation
//!
//! `hash` is the SHA-256 hex digest of the canonical JSON of
//! `{index, timestamp, transactions, previous_hash, nonce}` — the `hash`
//! field itself is excluded. A block is *mined* when its hash starts with
//! `difficulty` zero hex characters.
//!
//! ## Genesis
//!
//! The genesis block is fully deterministic: index 0, a fixed timestamp,
//! no transactions, `previous_hash = "0"`, nonce 0. Every node computes the
//! identical genesis hash, which is what makes chains comparable across the
//! network without any coordination.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::config::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::transaction::Transaction;

/// A sealed unit of the chain. Immutable once mined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, 0-indexed; genesis = 0.
    pub index: u64,
    /// ISO-8601 UTC timestamp set at seal time.
    pub timestamp: String,
    /// Ordered transactions. Empty only for genesis.
    pub transactions: Vec<Transaction>,
    /// Hex hash of the prior block; `"0"` for genesis.
    pub previous_hash: String,
    /// Proof-of-work nonce found by mining.
    pub nonce: u64,
    /// SHA-256 hex of this block's canonical JSON (excluding this field).
    pub hash: String,
}

impl Block {
    /// The deterministic genesis block shared by every node.
    pub fn genesis() -> Self {
        let mut block = Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP.to_string(),
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Builds an unsealed candidate extending a parent. The caller mines it
    /// by incrementing `nonce` until the hash meets difficulty.
    pub fn candidate(
        index: u64,
        timestamp: String,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Recomputes this block's hash from its contents.
    pub fn compute_hash(&self) -> String {
        let body = json!({
            "index": self.index,
            "timestamp": &self.timestamp,
            "transactions": &self.transactions,
            "previous_hash": &self.previous_hash,
            "nonce": self.nonce,
        });
        let canon = canonical::canonical_string(&body);
        hex::encode(Sha256::digest(canon.as_bytes()))
    }

    /// Whether the stored hash carries the required leading zeros.
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.bytes().take(difficulty).filter(|b| *b == b'0').count() == difficulty
    }

    /// Whether the stored hash matches the block contents.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Action;
    use std::collections::BTreeMap;

    fn sample_tx() -> Transaction {
        Transaction::new(
            "BATCH_001",
            Action::Registered,
            "Supplier_A",
            "2026-01-15T09:30:00.000000",
            BTreeMap::new(),
        )
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.index, 0);
        assert_eq!(a.previous_hash, "0");
        assert!(a.transactions.is_empty());
        assert!(a.hash_is_consistent());
    }

    #[test]
    fn hash_excludes_hash_field() {
        let mut block = Block::genesis();
        let original = block.compute_hash();
        block.hash = "tampered".to_string();
        // Changing the stored hash does not change the computed hash.
        assert_eq!(block.compute_hash(), original);
        assert!(!block.hash_is_consistent());
    }

    #[test]
    fn hash_covers_every_sealed_field() {
        let base = Block::candidate(
            1,
            "2026-01-15T10:00:00.000000".to_string(),
            vec![sample_tx()],
            Block::genesis().hash,
        );

        let mut bumped_nonce = base.clone();
        bumped_nonce.nonce += 1;
        assert_ne!(base.compute_hash(), bumped_nonce.compute_hash());

        let mut moved_index = base.clone();
        moved_index.index += 1;
        assert_ne!(base.compute_hash(), moved_index.compute_hash());

        let mut relinked = base.clone();
        relinked.previous_hash = "0".repeat(64);
        assert_ne!(base.compute_hash(), relinked.compute_hash());

        let mut edited_tx = base.clone();
        edited_tx.transactions[0]
            .metadata
            .insert("product".to_string(), serde_json::json!("Tea"));
        assert_ne!(base.compute_hash(), edited_tx.compute_hash());
    }

    #[test]
    fn difficulty_counts_leading_zero_hex_chars() {
        let mut block = Block::genesis();
        block.hash = format!("00ab{}", "f".repeat(60));
        assert!(block.meets_difficulty(0));
        assert!(block.meets_difficulty(1));
        assert!(block.meets_difficulty(2));
        assert!(!block.meets_difficulty(3));
    }

    #[test]
    fn serde_round_trip() {
        let block = Block::candidate(
            3,
            "2026-01-15T11:00:00.000000".to_string(),
            vec![sample_tx()],
            "ab".repeat(32),
        );
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert!(back.hash_is_consistent());
    }
}
