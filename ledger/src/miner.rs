//! # Proof-of-Work Miner
//!
//! Single-threaded nonce search. The search is CPU-bound, so it runs on a
//! blocking thread and cooperates with the rest of the node through a
//! cancellation flag: when a peer block extends the head mid-search, the
//! flag flips and the attempt is abandoned cleanly. Cancellation is not a
//! failure — the snapshot transactions simply stay in the mempool for the
//! next round.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::chain::Block;
use crate::config::CANCEL_CHECK_STRIDE;
use crate::error::LedgerError;

/// Increments the candidate's nonce until its hash carries `difficulty`
/// leading zero hex characters.
///
/// Checks `cancel` every [`CANCEL_CHECK_STRIDE`] attempts and returns
/// [`LedgerError::MiningCancelled`] when it has been raised.
pub fn seal(mut candidate: Block, difficulty: usize, cancel: &AtomicBool) -> Result<Block, LedgerError> {
    let mut attempts: u64 = 0;
    loop {
        if attempts % CANCEL_CHECK_STRIDE == 0 && cancel.load(Ordering::Relaxed) {
            debug!(
                index = candidate.index,
                attempts, "mining attempt cancelled"
            );
            return Err(LedgerError::MiningCancelled);
        }

        candidate.hash = candidate.compute_hash();
        if candidate.meets_difficulty(difficulty) {
            debug!(
                index = candidate.index,
                nonce = candidate.nonce,
                attempts,
                hash = %candidate.hash,
                "block sealed"
            );
            return Ok(candidate);
        }

        candidate.nonce += 1;
        attempts += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Block {
        Block::candidate(
            1,
            "2026-01-15T10:00:00.000000".to_string(),
            vec![],
            Block::genesis().hash,
        )
    }

    #[test]
    fn seals_at_difficulty_two() {
        let sealed = seal(candidate(), 2, &AtomicBool::new(false)).unwrap();
        assert!(sealed.hash.starts_with("00"));
        assert!(sealed.hash_is_consistent());
        assert!(sealed.meets_difficulty(2));
    }

    #[test]
    fn zero_difficulty_seals_immediately() {
        let sealed = seal(candidate(), 0, &AtomicBool::new(false)).unwrap();
        assert_eq!(sealed.nonce, 0);
    }

    #[test]
    fn sealed_block_survives_revalidation() {
        let sealed = seal(candidate(), 2, &AtomicBool::new(false)).unwrap();
        // The hash stored during sealing must be exactly the recomputed one.
        assert_eq!(sealed.hash, sealed.compute_hash());
    }

    #[test]
    fn pre_raised_cancel_flag_aborts() {
        let cancel = AtomicBool::new(true);
        let result = seal(candidate(), 5, &cancel);
        assert!(matches!(result, Err(LedgerError::MiningCancelled)));
    }

    #[test]
    fn deterministic_for_same_candidate() {
        let a = seal(candidate(), 2, &AtomicBool::new(false)).unwrap();
        let b = seal(candidate(), 2, &AtomicBool::new(false)).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }
}
