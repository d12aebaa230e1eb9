//! # Provchain Ledger — Core Library
//!
//! A replicated append-only ledger for multi-party supply-chain tracking.
//! Independent nodes form a small peer network; each node keeps a full chain
//! of proof-of-work blocks whose transactions are digitally signed business
//! events (product registration, quality check, shipment, receipt, storage,
//! delivery, retail receipt, sale).
//!
//! ## Architecture
//!
//! The crate is split into modules mirroring the concerns of a ledger node:
//!
//! - **canonical** — Byte-exact canonical JSON, the only cross-party contract.
//! - **crypto** — RSA-2048 PKCS#1 v1.5 signing and a PEM keystore per actor.
//! - **transaction** — Signed business events and the action vocabulary.
//! - **semantics** — The per-batch action state machine and role policy.
//! - **chain** — Block model, hashing, proof-of-work, full-chain validation.
//! - **mempool** — Insertion-ordered pool of admitted pending transactions.
//! - **miner** — Nonce search with cooperative cancellation.
//! - **network** — Peer registry, HTTP peer client, longest-chain sync.
//! - **store** — Durable sled-backed persistence of blocks and peers.
//! - **node** — The `LedgerNode` runtime tying everything together.
//!
//! ## Design Philosophy
//!
//! 1. One normative canonical encoder; every hash and signature goes through it.
//! 2. Blocks are immutable after sealing. The chain only ever grows or is
//!    wholesale replaced by a strictly longer, fully valid peer chain.
//! 3. Admission is strict: a transaction that reaches the mempool will be
//!    minable — shape, signature, identity, duplication, and batch order are
//!    all checked up front.

pub mod canonical;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod miner;
pub mod network;
pub mod node;
pub mod semantics;
pub mod store;
pub mod transaction;

pub use chain::{Block, Chain, ChainInvalid, InvalidKind};
pub use config::NodeConfig;
pub use error::LedgerError;
pub use node::LedgerNode;
pub use transaction::{Action, Role, Transaction, TxKey};
