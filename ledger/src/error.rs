//! Ledger-wide error type.
//!
//! One enum, stable across layers. The HTTP surface maps each variant to a
//! status code; internal subsystems with richer local errors (crypto, peer
//! client) convert into these kinds at their boundary.

use thiserror::Error;

/// Errors surfaced by the ledger core.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or incomplete input — the client's fault.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A signature failed to verify, or the embedded public key does not
    /// match the key registered for the claimed actor.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The transaction names an actor with no registered key material.
    #[error("unknown actor: {0}")]
    UnknownActor(String),

    /// The action is not legal in the batch's current state.
    #[error("{0}")]
    InvalidOrder(String),

    /// The same signed transaction is already pending or sealed.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// The local chain failed validation; writes are refused until healed.
    #[error("chain invalid: {0}")]
    ChainInvalid(String),

    /// Every known peer is unreachable or unhealthy.
    #[error("no healthy peers available")]
    NoHealthyPeers,

    /// A durable write or read failed. The in-memory state was rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A mining attempt was abandoned because the chain head moved.
    /// Not a failure — the snapshot transactions stay in the mempool.
    #[error("mining cancelled: chain head moved")]
    MiningCancelled,

    /// An outbound peer call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<crate::chain::ChainInvalid> for LedgerError {
    fn from(err: crate::chain::ChainInvalid) -> Self {
        LedgerError::ChainInvalid(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::BadRequest(err.to_string())
    }
}
