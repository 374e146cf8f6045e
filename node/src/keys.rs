//! Signing oracle and key persistence.
//!
//! A node identity is an Ed25519 keypair. The hex-encoded secret seed,
//! public key and the derived address are persisted together as a keydict
//! under `private/keys.dat`, generated on first start.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::address::make_address;
use crate::error::{NodeError, Result};

/// Hex-encoded keypair plus the derived address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyDict {
    /// Hex of the 32-byte Ed25519 secret seed.
    pub private_key: String,
    /// Hex of the 32-byte Ed25519 public key.
    pub public_key: String,
    /// Address derived from `public_key`.
    pub address: String,
}

fn keyfile_path(home: &Path) -> PathBuf {
    home.join("private").join("keys.dat")
}

/// True when a keydict has already been generated under `home`.
pub fn keyfile_found(home: &Path) -> bool {
    keyfile_path(home).is_file()
}

/// Generates a fresh keypair and derives its address.
pub fn generate_keys() -> KeyDict {
    let signing = SigningKey::generate(&mut rand::rngs::OsRng);
    let public_key = hex::encode(signing.verifying_key().to_bytes());
    KeyDict {
        private_key: hex::encode(signing.to_bytes()),
        address: make_address(&public_key),
        public_key,
    }
}

/// Persists a keydict under `home`.
pub fn save_keys(home: &Path, keydict: &KeyDict) -> Result<()> {
    let path = keyfile_path(home);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec(keydict)?)?;
    Ok(())
}

/// Loads the keydict from `home`.
///
/// A missing or unreadable key file at startup is fatal.
pub fn load_keys(home: &Path) -> Result<KeyDict> {
    let raw = std::fs::read_to_string(keyfile_path(home))
        .map_err(|e| NodeError::Fatal(format!("cannot read key file: {e}")))?;
    serde_json::from_str(&raw).map_err(|e| NodeError::Fatal(format!("corrupt key file: {e}")))
}

fn decode_exact<const N: usize>(hex_str: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| NodeError::validation(format!("invalid {what} hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| NodeError::validation(format!("{what} must be {N} bytes")))
}

/// Signs `message` with the hex-encoded secret seed, returning a hex
/// signature.
pub fn sign_message(private_key: &str, message: &[u8]) -> Result<String> {
    let seed: [u8; 32] = decode_exact(private_key, "private key")?;
    let signing = SigningKey::from_bytes(&seed);
    let signature: Signature = signing.sign(message);
    Ok(hex::encode(signature.to_bytes()))
}

/// Verifies a hex signature over `message` under a hex public key.
pub fn verify_signature(public_key: &str, message: &[u8], signature: &str) -> Result<bool> {
    let pk_bytes: [u8; 32] = decode_exact(public_key, "public key")?;
    let sig_bytes: [u8; 64] = decode_exact(signature, "signature")?;

    let verifying = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| NodeError::validation(format!("invalid public key: {e}")))?;
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(verifying.verify_strict(message, &signature).is_ok())
}
