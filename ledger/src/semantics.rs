//! # Batch Semantics
//!
//! The supply-chain state machine. Every batch walks the same eight-step
//! ladder, one action at a time, with no skips and no repeats:
//!
//! ```text
//! registered -> quality_checked -> shipped -> received -> stored
//!            -> delivered -> received_retail -> sold
//! ```
//!
//! A `quality_checked` whose metadata carries `result = "failed"` permanently
//! blocks the `shipped` step. On top of the ladder sits custody policy: each
//! action requires the right role of actor, a role keeps ownership within its
//! segment, and hand-offs must name matching counterparties (`shipped.to`
//! must be the distributor that later performs `received`, symmetrically for
//! `delivered`/`received_retail`).
//!
//! Admission evaluates a candidate against the sealed chain *and* the
//! mempool, so two conflicting pending events can never both be admitted.
//! Full-chain validation replays only the ladder (ordering, duplicates,
//! failed-QC) — custody is enforced once, at admission.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::LedgerError;
use crate::transaction::{Action, Role, Transaction};

/// Metadata key carrying the quality inspection outcome.
const RESULT_KEY: &str = "result";
/// Inspection outcome that blocks shipment.
const RESULT_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Validates a candidate transaction against the batch's sealed history and
/// its pending mempool events, in that order of precedence.
///
/// `history` is the batch's sealed transactions in chain order; `pending`
/// its mempool transactions in insertion order. Both must already be
/// filtered to `tx.batch_id`.
pub fn validate_admission(
    history: &[Transaction],
    pending: &[Transaction],
    tx: &Transaction,
) -> Result<(), LedgerError> {
    validate_order(history, pending, tx)?;
    validate_custody(history, pending, tx)
}

/// The strict sequential ladder: no repeats, exact prerequisite, failed
/// quality check blocks shipment.
fn validate_order(
    history: &[Transaction],
    pending: &[Transaction],
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let sealed: Vec<Action> = history.iter().map(|t| t.action).collect();
    let queued: Vec<Action> = pending.iter().map(|t| t.action).collect();

    if sealed.contains(&tx.action) {
        return Err(LedgerError::InvalidOrder(format!(
            "Action '{}' already recorded for batch {}",
            tx.action, tx.batch_id
        )));
    }
    if queued.contains(&tx.action) {
        return Err(LedgerError::InvalidOrder(format!(
            "Action '{}' is already pending for batch {}",
            tx.action, tx.batch_id
        )));
    }

    if let Some(required) = tx.action.prerequisite() {
        if !sealed.contains(&required) && !queued.contains(&required) {
            return Err(LedgerError::InvalidOrder(format!(
                "Cannot perform '{}' without first completing '{}' for batch {}",
                tx.action, required, tx.batch_id
            )));
        }
    }

    if tx.action == Action::Shipped && quality_check_failed(history.iter().chain(pending)) {
        return Err(LedgerError::InvalidOrder(format!(
            "Cannot ship batch {}: quality check failed",
            tx.batch_id
        )));
    }

    Ok(())
}

/// Role and ownership policy, plus hand-off counterparty matching.
fn validate_custody(
    history: &[Transaction],
    pending: &[Transaction],
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let actor_role = Role::of_actor(&tx.actor).ok_or_else(|| {
        LedgerError::InvalidOrder(format!(
            "'{}' does not identify a supplier, distributor, or retailer",
            tx.actor
        ))
    })?;

    let expected = tx.action.required_role();
    if actor_role != expected {
        return Err(LedgerError::InvalidOrder(format!(
            "'{}' is not a valid {} for action '{}'",
            tx.actor, expected, tx.action
        )));
    }

    // Chronological view of everything known about the batch.
    let events: Vec<&Transaction> = history.iter().chain(pending).collect();

    // Registration opens a batch; nothing more to check.
    if tx.action == Action::Registered {
        return Ok(());
    }

    // Ownership: while custody stays within one role segment, the same
    // actor must perform every step of that segment.
    if let Some(last) = events.last() {
        let owner_role = Role::of_actor(&last.actor);
        if owner_role == Some(actor_role) && tx.actor != last.actor {
            return Err(LedgerError::InvalidOrder(format!(
                "Ownership violation: '{}' cannot perform '{}' — current owner is '{}'",
                tx.actor, tx.action, last.actor
            )));
        }
    }

    // Hand-off matching: the receiver must be the named counterparty, and
    // the receiver's `from` must name the actual sender.
    match tx.action {
        Action::Received => check_handoff(&events, Action::Shipped, tx),
        Action::ReceivedRetail => check_handoff(&events, Action::Delivered, tx),
        _ => Ok(()),
    }
}

/// Matches a `received`-style event against the `shipped`-style event that
/// precedes it.
fn check_handoff(
    events: &[&Transaction],
    handoff: Action,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let sent = events.iter().find(|t| t.action == handoff).ok_or_else(|| {
        // The ladder already guarantees this exists; defect in the caller if not.
        LedgerError::InvalidOrder(format!(
            "Cannot perform '{}' without first completing '{}' for batch {}",
            tx.action, handoff, tx.batch_id
        ))
    })?;

    if let Some(to) = sent.metadata.get("to").and_then(Value::as_str) {
        if to != tx.actor {
            return Err(LedgerError::InvalidOrder(format!(
                "Batch {} was sent to '{}', but '{}' is trying to receive it",
                tx.batch_id, to, tx.actor
            )));
        }
    }
    if let Some(from) = tx.metadata.get("from").and_then(Value::as_str) {
        if from != sent.actor {
            return Err(LedgerError::InvalidOrder(format!(
                "Batch {} was sent by '{}', but the receipt names '{}'",
                tx.batch_id, sent.actor, from
            )));
        }
    }
    Ok(())
}

fn quality_check_failed<'a>(events: impl Iterator<Item = &'a Transaction>) -> bool {
    let mut events = events;
    events.any(|t| {
        t.action == Action::QualityChecked
            && t.metadata.get(RESULT_KEY).and_then(Value::as_str) == Some(RESULT_FAILED)
    })
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Replays a stream of transactions in chain order and verifies every batch
/// follows the ladder. Returns the first violation as a message.
///
/// Used by full-chain validation and by block receipt, where the stream is
/// the existing chain followed by the incoming block's transactions.
pub fn replay<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> Result<(), String> {
    let mut batches: HashMap<&str, BatchState> = HashMap::new();

    for tx in transactions {
        let state = batches.entry(tx.batch_id.as_str()).or_default();

        if state.seen.contains(&tx.action) {
            return Err(format!(
                "action '{}' repeated for batch {}",
                tx.action, tx.batch_id
            ));
        }
        if let Some(required) = tx.action.prerequisite() {
            if !state.seen.contains(&required) {
                return Err(format!(
                    "action '{}' before '{}' for batch {}",
                    tx.action, required, tx.batch_id
                ));
            }
        }
        if tx.action == Action::Shipped && state.quality_failed {
            return Err(format!("batch {} shipped after failed quality check", tx.batch_id));
        }

        if tx.action == Action::QualityChecked
            && tx.metadata.get(RESULT_KEY).and_then(Value::as_str) == Some(RESULT_FAILED)
        {
            state.quality_failed = true;
        }
        state.seen.push(tx.action);
    }

    Ok(())
}

/// Whether an already-sealed action sequence is a valid ladder walk.
/// Strict sequencing means a valid sequence is exactly a prefix of
/// [`Action::ALL`].
pub fn is_valid_path(actions: &[Action]) -> bool {
    actions.len() <= Action::ALL.len() && actions == &Action::ALL[..actions.len()]
}

#[derive(Default)]
struct BatchState {
    seen: Vec<Action>,
    quality_failed: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
