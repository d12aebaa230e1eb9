//! # Keystore
//!
//! PEM key files in a flat directory, one pair per actor:
//!
//! ```text
//! keys/
//! ├── Supplier_A_private.pem     (PKCS#8, mode 0600)
//! ├── Supplier_A_public.pem      (SPKI)
//! ├── Distributor_B_private.pem
//! └── ...
//! ```
//!
//! The public half doubles as the actor's registered identity: a verifier
//! compares the key embedded in a transaction against the file registered
//! here for the claimed actor, so a valid signature under somebody else's
//! key never authenticates.

use std::fs;
use std::path::{Path, PathBuf};

use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::info;

/// RSA modulus size for actor keys.
const KEY_BITS: usize = 2048;

/// Errors from key management and signature primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The actor has no key file in the keystore directory.
    #[error("no key registered for actor '{0}'")]
    KeyNotFound(String),

    #[error("key I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key failed to parse or generate.
    #[error("key error: {0}")]
    Key(String),

    /// Base64 or UTF-8 decoding of wire key material failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Directory-backed registry of actor key pairs.
#[derive(Debug, Clone)]
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Opens (creating if needed) a keystore directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CryptoError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn private_path(&self, actor: &str) -> PathBuf {
        self.dir.join(format!("{actor}_private.pem"))
    }

    fn public_path(&self, actor: &str) -> PathBuf {
        self.dir.join(format!("{actor}_public.pem"))
    }

    /// Whether the actor has a registered public key.
    pub fn has_actor(&self, actor: &str) -> bool {
        self.public_path(actor).exists()
    }

    /// Generates and saves a fresh RSA-2048 key pair for an actor, or loads
    /// the existing pair if one is already registered.
    pub fn register_actor(&self, actor: &str) -> Result<RsaPublicKey, CryptoError> {
        if self.has_actor(actor) {
            info!(actor, "keys already registered, loading");
            return self.public_key(actor);
        }

        info!(actor, bits = KEY_BITS, "generating key pair");
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(e.to_string()))?;

        let private_path = self.private_path(actor);
        fs::write(&private_path, private_pem.as_bytes())?;
        restrict_permissions(&private_path)?;
        fs::write(self.public_path(actor), public_pem.as_bytes())?;

        Ok(public)
    }

    /// Loads an actor's private key.
    pub fn private_key(&self, actor: &str) -> Result<RsaPrivateKey, CryptoError> {
        let path = self.private_path(actor);
        if !path.exists() {
            return Err(CryptoError::KeyNotFound(actor.to_string()));
        }
        let pem = fs::read_to_string(path)?;
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| CryptoError::Key(e.to_string()))
    }

    /// Loads an actor's registered public key.
    pub fn public_key(&self, actor: &str) -> Result<RsaPublicKey, CryptoError> {
        let path = self.public_path(actor);
        if !path.exists() {
            return Err(CryptoError::KeyNotFound(actor.to_string()));
        }
        let pem = fs::read_to_string(path)?;
        RsaPublicKey::from_public_key_pem(&pem).map_err(|e| CryptoError::Key(e.to_string()))
    }

    /// An actor's public key in PEM form.
    pub fn public_key_pem(&self, actor: &str) -> Result<String, CryptoError> {
        let path = self.public_path(actor);
        if !path.exists() {
            return Err(CryptoError::KeyNotFound(actor.to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// An actor's public key as the base64-of-PEM string embedded in
    /// transactions.
    pub fn public_key_b64(&self, actor: &str) -> Result<String, CryptoError> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        Ok(STANDARD.encode(self.public_key_pem(actor)?))
    }

    /// All actors with a registered public key.
    pub fn list_actors(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut actors: Vec<String> = entries
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().into_string().ok()?;
                name.strip_suffix("_public.pem").map(str::to_string)
            })
            .collect();
        actors.sort();
        actors
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
