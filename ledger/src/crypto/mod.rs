//! # Cryptography
//!
//! RSA-2048 signatures with PKCS#1 v1.5 padding over SHA-256, the scheme
//! every participant's tooling speaks. Keys live as PEM files in a
//! directory keyed by actor name; verification binds the embedded public
//! key to the registered identity of the claimed actor.

pub mod keys;
pub mod signing;

pub use keys::{CryptoError, Keystore};
pub use signing::{sign_transaction, SignatureVerifier};
