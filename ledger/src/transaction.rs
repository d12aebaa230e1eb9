//! # Transactions
//!
//! The signed business events the ledger records. Every transaction traces
//! one step of a physical batch through the supply chain: a Supplier
//! registers, checks, and ships it; a Distributor receives, stores, and
//! delivers it; a Retailer receives and finally sells it.
//!
//! A transaction's *signed fields* are everything except `signature` and
//! `public_key`. They are canonicalized (see [`crate::canonical`]) and signed
//! by the submitting actor; verifiers must reproduce the identical bytes,
//! which is why the `timestamp` is carried as the submitter's literal string
//! and never re-formatted by the node.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical;
use crate::config::TIMESTAMP_FORMAT;
use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The eight supply-chain actions, in their strict sequential order.
///
/// Each action (except `registered`) has exactly one prerequisite — the
/// immediately preceding step. The wire names are snake_case strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A supplier registers a new batch. The entry point of every trace.
    Registered,
    /// The supplier records a quality inspection. A `result` of `"failed"`
    /// in the metadata permanently blocks shipment.
    QualityChecked,
    /// The supplier hands the batch to a distributor (`metadata.to`).
    Shipped,
    /// The distributor named in the shipment confirms receipt.
    Received,
    /// The distributor places the batch in storage.
    Stored,
    /// The distributor hands the batch to a retailer (`metadata.to`).
    Delivered,
    /// The retailer named in the delivery confirms receipt.
    ReceivedRetail,
    /// The retailer sells the batch. Terminal state.
    Sold,
}

impl Action {
    /// All actions in protocol order.
    pub const ALL: [Action; 8] = [
        Action::Registered,
        Action::QualityChecked,
        Action::Shipped,
        Action::Received,
        Action::Stored,
        Action::Delivered,
        Action::ReceivedRetail,
        Action::Sold,
    ];

    /// The snake_case wire name.
    pub fn wire_name(self) -> &'static str {
        match self {
            Action::Registered => "registered",
            Action::QualityChecked => "quality_checked",
            Action::Shipped => "shipped",
            Action::Received => "received",
            Action::Stored => "stored",
            Action::Delivered => "delivered",
            Action::ReceivedRetail => "received_retail",
            Action::Sold => "sold",
        }
    }

    /// The exact action that must already exist for this one to be legal.
    /// `None` only for `registered`.
    pub fn prerequisite(self) -> Option<Action> {
        match self {
            Action::Registered => None,
            Action::QualityChecked => Some(Action::Registered),
            Action::Shipped => Some(Action::QualityChecked),
            Action::Received => Some(Action::Shipped),
            Action::Stored => Some(Action::Received),
            Action::Delivered => Some(Action::Stored),
            Action::ReceivedRetail => Some(Action::Delivered),
            Action::Sold => Some(Action::ReceivedRetail),
        }
    }

    /// Which role of actor may perform this action.
    pub fn required_role(self) -> Role {
        match self {
            Action::Registered | Action::QualityChecked | Action::Shipped => Role::Supplier,
            Action::Received | Action::Stored | Action::Delivered => Role::Distributor,
            Action::ReceivedRetail | Action::Sold => Role::Retailer,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Action {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.wire_name() == s)
            .ok_or_else(|| LedgerError::BadRequest(format!("unknown action '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The three participant roles. An actor's role is encoded in its name
/// prefix (`Supplier_A`, `Distributor_B`, `Retailer_C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Supplier,
    Distributor,
    Retailer,
}

impl Role {
    /// Derives the role from an actor name, or `None` for an unrecognized
    /// prefix. Matching is case-insensitive.
    pub fn of_actor(actor: &str) -> Option<Role> {
        let lower = actor.to_lowercase();
        if lower.starts_with("supplier") {
            Some(Role::Supplier)
        } else if lower.starts_with("distributor") {
            Some(Role::Distributor)
        } else if lower.starts_with("retailer") {
            Some(Role::Retailer)
        } else {
            None
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Supplier => write!(f, "supplier"),
            Role::Distributor => write!(f, "distributor"),
            Role::Retailer => write!(f, "retailer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A signed supply-chain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identifies the physical batch traced end-to-end.
    pub batch_id: String,

    /// The supply-chain step this event records.
    pub action: Action,

    /// Name of the acting party, e.g. `Supplier_A`.
    pub actor: String,

    /// ISO-8601 microsecond UTC timestamp, set by the submitter. Kept as the
    /// literal submitted string — it is part of the signed bytes.
    pub timestamp: String,

    /// Action-specific fields, e.g. `{from, to}` for shipments or
    /// `{result, inspector}` for quality checks. Values are free-form JSON
    /// (strings, numbers, nested structures) and are canonicalized as
    /// submitted.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Base64 RSA signature over the canonical JSON of the signed fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Base64-encoded PEM of the signer's public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Transaction {
    /// Builds an unsigned transaction with the given timestamp.
    pub fn new(
        batch_id: impl Into<String>,
        action: Action,
        actor: impl Into<String>,
        timestamp: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            action,
            actor: actor.into(),
            timestamp: timestamp.into(),
            metadata,
            signature: None,
            public_key: None,
        }
    }

    /// The fields covered by the signature — everything except `signature`
    /// and `public_key`.
    pub fn signed_fields(&self) -> Value {
        json!({
            "batch_id": &self.batch_id,
            "action": self.action,
            "actor": &self.actor,
            "timestamp": &self.timestamp,
            "metadata": &self.metadata,
        })
    }

    /// The canonical bytes a signer signs and a verifier checks.
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical::canonical_string(&self.signed_fields()).into_bytes()
    }

    /// The at-most-once identity of this transaction.
    pub fn key(&self) -> TxKey {
        TxKey {
            batch_id: self.batch_id.clone(),
            action: self.action,
            actor: self.actor.clone(),
            timestamp: self.timestamp.clone(),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Structural checks: required fields non-empty, timestamp parseable.
    pub fn validate_shape(&self) -> Result<(), LedgerError> {
        if self.batch_id.trim().is_empty() {
            return Err(LedgerError::BadRequest("batch_id must not be empty".into()));
        }
        if self.actor.trim().is_empty() {
            return Err(LedgerError::BadRequest("actor must not be empty".into()));
        }
        if parse_timestamp(&self.timestamp).is_none() {
            return Err(LedgerError::BadRequest(format!(
                "timestamp '{}' is not ISO-8601",
                self.timestamp
            )));
        }
        Ok(())
    }
}

/// Parses a ledger timestamp: ISO-8601 with optional fractional seconds and
/// an optional trailing `Z`.
pub fn parse_timestamp(ts: &str) -> Option<chrono::NaiveDateTime> {
    let trimmed = ts.strip_suffix('Z').unwrap_or(ts);
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Formats a `NaiveDateTime` back into the wire format.
pub fn format_timestamp(ts: chrono::NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// TxKey
// ---------------------------------------------------------------------------

/// The de-duplication identity of a transaction: equality of its signed
/// fields, reduced to the discriminating subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxKey {
    pub batch_id: String,
    pub action: Action,
    pub actor: String,
    pub timestamp: String,
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.batch_id, self.action, self.actor, self.timestamp
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut metadata = BTreeMap::new();
        metadata.insert("product".to_string(), json!("Coffee"));
        Transaction::new(
            "BATCH_001",
            Action::Registered,
            "Supplier_A",
            "2026-01-15T09:30:00.000123",
            metadata,
        )
    }

    #[test]
    fn action_wire_names_round_trip() {
        for action in Action::ALL {
            let parsed: Action = action.wire_name().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert!("teleported".parse::<Action>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_wire_names() {
        let json = serde_json::to_string(&Action::ReceivedRetail).unwrap();
        assert_eq!(json, "\"received_retail\"");
        let back: Action = serde_json::from_str("\"quality_checked\"").unwrap();
        assert_eq!(back, Action::QualityChecked);
    }

    #[test]
    fn prerequisite_chain_is_linear() {
        // Walking prerequisites from `sold` must reach `registered` in
        // exactly seven hops.
        let mut current = Action::Sold;
        let mut hops = 0;
        while let Some(prev) = current.prerequisite() {
            current = prev;
            hops += 1;
        }
        assert_eq!(current, Action::Registered);
        assert_eq!(hops, 7);
    }

    #[test]
    fn roles_follow_custody() {
        assert_eq!(Action::Registered.required_role(), Role::Supplier);
        assert_eq!(Action::Shipped.required_role(), Role::Supplier);
        assert_eq!(Action::Received.required_role(), Role::Distributor);
        assert_eq!(Action::Delivered.required_role(), Role::Distributor);
        assert_eq!(Action::ReceivedRetail.required_role(), Role::Retailer);
        assert_eq!(Action::Sold.required_role(), Role::Retailer);
    }

    #[test]
    fn role_from_actor_prefix() {
        assert_eq!(Role::of_actor("Supplier_A"), Some(Role::Supplier));
        assert_eq!(Role::of_actor("distributor_b"), Some(Role::Distributor));
        assert_eq!(Role::of_actor("Retailer_C"), Some(Role::Retailer));
        assert_eq!(Role::of_actor("Auditor_X"), None);
    }

    #[test]
    fn signed_fields_exclude_signature_and_key() {
        let mut tx = sample_tx();
        tx.signature = Some("sig".to_string());
        tx.public_key = Some("key".to_string());

        let fields = tx.signed_fields();
        let obj = fields.as_object().unwrap();
        assert!(obj.contains_key("batch_id"));
        assert!(obj.contains_key("metadata"));
        assert!(!obj.contains_key("signature"));
        assert!(!obj.contains_key("public_key"));
    }

    #[test]
    fn signing_bytes_stable_under_signature_attachment() {
        let mut tx = sample_tx();
        let before = tx.signing_bytes();
        tx.signature = Some("sig".to_string());
        tx.public_key = Some("key".to_string());
        assert_eq!(tx.signing_bytes(), before);
    }

    #[test]
    fn unsigned_fields_omitted_from_wire_form() {
        let tx = sample_tx();
        let json = serde_json::to_string(&tx).unwrap();
        assert!(!json.contains("signature"));
        assert!(!json.contains("public_key"));
    }

    #[test]
    fn key_distinguishes_timestamp() {
        let a = sample_tx();
        let mut b = sample_tx();
        b.timestamp = "2026-01-15T09:30:01.000000".to_string();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn shape_rejects_empty_fields_and_bad_timestamps() {
        let mut tx = sample_tx();
        assert!(tx.validate_shape().is_ok());

        tx.batch_id = "  ".to_string();
        assert!(matches!(
            tx.validate_shape(),
            Err(LedgerError::BadRequest(_))
        ));

        let mut tx = sample_tx();
        tx.timestamp = "yesterday".to_string();
        assert!(tx.validate_shape().is_err());
    }

    #[test]
    fn timestamp_parser_accepts_variants() {
        assert!(parse_timestamp("2026-01-15T09:30:00").is_some());
        assert!(parse_timestamp("2026-01-15T09:30:00.5").is_some());
        assert!(parse_timestamp("2026-01-15T09:30:00.000123").is_some());
        assert!(parse_timestamp("2026-01-15T09:30:00.000123Z").is_some());
        assert!(parse_timestamp("2026-01-15 09:30:00").is_none());
    }

    #[test]
    fn wire_round_trip_preserves_metadata_keys() {
        let mut tx = sample_tx();
        tx.metadata
            .insert("inspector".to_string(), json!("QA-7"));
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.metadata["inspector"], "QA-7");
    }

    #[test]
    fn metadata_carries_non_string_values() {
        // Submitters may attach numbers (e.g. a quantity) alongside
        // strings; the signed bytes must carry the raw decimal form.
        let mut tx = sample_tx();
        tx.metadata.insert("quantity".to_string(), json!(50));

        let wire = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.metadata["quantity"], 50);

        let canon = String::from_utf8(tx.signing_bytes()).unwrap();
        assert!(canon.contains(r#""quantity":50"#), "got: {canon}");
    }
}
