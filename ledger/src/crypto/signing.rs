//! # Transaction Signing & Verification
//!
//! Signatures cover the canonical JSON of a transaction's signed fields
//! (everything except `signature` and `public_key`), RSA-2048 with
//! PKCS#1 v1.5 padding over SHA-256.
//!
//! Verification does more than check math. The public key embedded in a
//! transaction must byte-match the key *registered* for the claimed actor,
//! so an attacker cannot sign with their own key and put someone else's
//! name in the `actor` field.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPublicKey;
use sha2::Sha256;

use super::keys::{CryptoError, Keystore};
use crate::error::LedgerError;
use crate::transaction::Transaction;

/// Signs a transaction in place with the actor's private key and attaches
/// the signer's public key.
///
/// The transaction's `timestamp` must already be set — it is part of the
/// signed bytes and must never change afterwards.
pub fn sign_transaction(keystore: &Keystore, tx: &mut Transaction) -> Result<(), CryptoError> {
    let private = keystore.private_key(&tx.actor)?;
    let signing_key = SigningKey::<Sha256>::new(private);

    let signature = signing_key.sign(&tx.signing_bytes());
    tx.signature = Some(BASE64.encode(signature.to_bytes()));
    tx.public_key = Some(keystore.public_key_b64(&tx.actor)?);
    Ok(())
}

/// Verifies transaction signatures and binds them to registered identities.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    keystore: Keystore,
    require_signatures: bool,
}

impl SignatureVerifier {
    pub fn new(keystore: Keystore, require_signatures: bool) -> Self {
        Self {
            keystore,
            require_signatures,
        }
    }

    pub fn requires_signatures(&self) -> bool {
        self.require_signatures
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    /// Full verification of one transaction:
    ///
    /// 1. Unsigned transactions are rejected when signatures are required.
    /// 2. The embedded public key must decode and must equal the key
    ///    registered for `tx.actor` (identity binding).
    /// 3. The RSA signature must verify over the canonical signed bytes.
    pub fn verify(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let Some(signature_b64) = &tx.signature else {
            if self.require_signatures {
                return Err(LedgerError::InvalidSignature(format!(
                    "transaction from '{}' is not signed",
                    tx.actor
                )));
            }
            return Ok(());
        };

        let public_key_b64 = tx.public_key.as_ref().ok_or_else(|| {
            LedgerError::InvalidSignature("signed transaction carries no public key".into())
        })?;
        let embedded = decode_public_key(public_key_b64)?;

        // Identity binding: the key on the wire must be the registered key.
        let registered = match self.keystore.public_key(&tx.actor) {
            Ok(key) => key,
            Err(CryptoError::KeyNotFound(actor)) => {
                return Err(LedgerError::UnknownActor(actor));
            }
            Err(e) => return Err(LedgerError::Persistence(e.to_string())),
        };
        if embedded != registered {
            return Err(LedgerError::InvalidSignature(format!(
                "public key does not match the key registered for '{}'",
                tx.actor
            )));
        }

        let signature_bytes = BASE64.decode(signature_b64).map_err(|e| {
            LedgerError::InvalidSignature(format!("signature is not valid base64: {e}"))
        })?;
        let signature = Signature::try_from(signature_bytes.as_slice()).map_err(|e| {
            LedgerError::InvalidSignature(format!("malformed signature: {e}"))
        })?;

        VerifyingKey::<Sha256>::new(embedded)
            .verify(&tx.signing_bytes(), &signature)
            .map_err(|_| {
                LedgerError::InvalidSignature(format!(
                    "signature does not verify for '{}'",
                    tx.actor
                ))
            })
    }
}

/// Decodes a base64-encoded PEM public key from the wire.
fn decode_public_key(b64: &str) -> Result<RsaPublicKey, LedgerError> {
    let pem_bytes = BASE64
        .decode(b64)
        .map_err(|e| LedgerError::InvalidSignature(format!("public key is not valid base64: {e}")))?;
    let pem = String::from_utf8(pem_bytes)
        .map_err(|e| LedgerError::InvalidSignature(format!("public key is not UTF-8 PEM: {e}")))?;
    RsaPublicKey::from_public_key_pem(&pem)
        .map_err(|e| LedgerError::InvalidSignature(format!("public key does not parse: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
