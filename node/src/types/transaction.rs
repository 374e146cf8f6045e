//! Transaction record, identity and origin proofs.
//!
//! A transaction is drafted without a fee (so the byte size of the draft
//! can serve as the base fee), then finalized: the fee is set, the txid is
//! computed as the Blake2b hash of the canonical unsigned encoding, and the
//! txid bytes are signed with the sender's Ed25519 key.
//!
//! Below [`legacy height`](crate::config::NodeConfig::legacy_signature_height)
//! the signed message is the canonical MessagePack encoding of the
//! transaction without its signature; newer blocks sign the raw txid bytes.

use serde::{Deserialize, Serialize};

use crate::address::{proof_sender, validate_address};
use crate::error::{NodeError, Result};
use crate::hashing::{blake2b_hash, canonical_json, create_nonce};
use crate::keys::{sign_message, verify_signature};

use super::BURN_ADDRESS;

/// A fully-formed transaction as gossiped and stored in blocks.
///
/// Field order is canonical: the unsigned views below serialize prefixes of
/// this struct in the same order, and all hashing depends on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address; must derive from `public_key`.
    pub sender: String,
    /// Recipient address, or the sentinel `"burn"`.
    pub recipient: String,
    /// Transferred amount in base units.
    pub amount: u64,
    /// Draft timestamp, seconds since epoch.
    pub timestamp: u64,
    /// Opaque payload carried along with the transfer.
    pub data: serde_json::Value,
    /// Random draft disambiguator.
    pub nonce: String,
    /// Hex Ed25519 public key of the sender.
    pub public_key: String,
    /// Block number this transaction is valid in.
    pub target_block: u64,
    /// Fee in base units, set at finalization.
    pub fee: u64,
    /// Blake2b hash of the canonical unsigned encoding.
    pub txid: String,
    /// Hex Ed25519 signature (see module docs for the signed message).
    pub signature: String,
}

/// Transaction draft: everything except fee, txid and signature.
///
/// Exists separately so the base fee (the byte size of the draft) can be
/// computed before the fee is chosen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub timestamp: u64,
    pub data: serde_json::Value,
    pub nonce: String,
    pub public_key: String,
    pub target_block: u64,
}

/// Canonical unsigned view: draft plus fee. Hashing this yields the txid.
#[derive(Serialize)]
struct UnsignedView<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: u64,
    timestamp: u64,
    data: &'a serde_json::Value,
    nonce: &'a str,
    public_key: &'a str,
    target_block: u64,
    fee: u64,
}

/// Everything except the signature; the legacy signed message.
#[derive(Serialize)]
struct PresignView<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: u64,
    timestamp: u64,
    data: &'a serde_json::Value,
    nonce: &'a str,
    public_key: &'a str,
    target_block: u64,
    fee: u64,
    txid: &'a str,
}

/// Builds a draft with a fresh nonce.
pub fn draft_transaction(
    sender: impl Into<String>,
    recipient: impl Into<String>,
    amount: u64,
    public_key: impl Into<String>,
    timestamp: u64,
    data: serde_json::Value,
    target_block: u64,
) -> TransactionDraft {
    TransactionDraft {
        sender: sender.into(),
        recipient: recipient.into(),
        amount,
        timestamp,
        data,
        nonce: create_nonce(),
        public_key: public_key.into(),
        target_block,
    }
}

impl TransactionDraft {
    fn unsigned_view(&self, fee: u64) -> UnsignedView<'_> {
        UnsignedView {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
            data: &self.data,
            nonce: &self.nonce,
            public_key: &self.public_key,
            target_block: self.target_block,
            fee,
        }
    }
}

/// Byte size of the draft's canonical encoding; the enforced fee floor for
/// fee estimation.
pub fn get_base_fee(draft: &TransactionDraft) -> u64 {
    canonical_json(draft).len() as u64
}

/// True when the fee covers the base fee of the equivalent draft.
pub fn validate_base_fee(transaction: &Transaction) -> bool {
    transaction.fee >= get_base_fee(&transaction.draft_view())
}

/// Finalizes a draft: sets the fee, computes the txid and signs it.
pub fn create_transaction(
    draft: TransactionDraft,
    private_key: &str,
    fee: u64,
) -> Result<Transaction> {
    let txid = blake2b_hash(&draft.unsigned_view(fee));
    let txid_bytes =
        hex::decode(&txid).map_err(|e| NodeError::validation(format!("txid hex: {e}")))?;
    let signature = sign_message(private_key, &txid_bytes)?;

    Ok(Transaction {
        sender: draft.sender,
        recipient: draft.recipient,
        amount: draft.amount,
        timestamp: draft.timestamp,
        data: draft.data,
        nonce: draft.nonce,
        public_key: draft.public_key,
        target_block: draft.target_block,
        fee,
        txid,
        signature,
    })
}

impl Transaction {
    fn unsigned_view(&self) -> UnsignedView<'_> {
        UnsignedView {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
            data: &self.data,
            nonce: &self.nonce,
            public_key: &self.public_key,
            target_block: self.target_block,
            fee: self.fee,
        }
    }

    fn presign_view(&self) -> PresignView<'_> {
        PresignView {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
            data: &self.data,
            nonce: &self.nonce,
            public_key: &self.public_key,
            target_block: self.target_block,
            fee: self.fee,
            txid: &self.txid,
        }
    }

    /// Rebuilds the draft this transaction was finalized from.
    pub fn draft_view(&self) -> TransactionDraft {
        TransactionDraft {
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            amount: self.amount,
            timestamp: self.timestamp,
            data: self.data.clone(),
            nonce: self.nonce.clone(),
            public_key: self.public_key.clone(),
            target_block: self.target_block,
        }
    }

    /// True when this transaction destroys its amount.
    pub fn is_burn(&self) -> bool {
        self.recipient == BURN_ADDRESS
    }

    /// Recomputes the txid from content and compares.
    pub fn validate_txid(&self) -> bool {
        blake2b_hash(&self.unsigned_view()) == self.txid
    }

    /// The message the signature covers at a given block height.
    pub fn signing_payload(&self, block_height: u64, legacy_signature_height: u64) -> Result<Vec<u8>> {
        if block_height < legacy_signature_height {
            Ok(rmp_serde::to_vec_named(&self.presign_view())?)
        } else {
            hex::decode(&self.txid).map_err(|e| NodeError::validation(format!("txid hex: {e}")))
        }
    }

    /// Proves the origin: the public key derives the sender address and the
    /// signature verifies over the height-appropriate message.
    pub fn validate_origin(&self, block_height: u64, legacy_signature_height: u64) -> Result<()> {
        if !proof_sender(&self.public_key, &self.sender) {
            return Err(NodeError::validation(format!(
                "public key does not derive sender {}",
                self.sender
            )));
        }

        let message = self.signing_payload(block_height, legacy_signature_height)?;
        if !verify_signature(&self.public_key, &message, &self.signature)? {
            return Err(NodeError::validation(format!(
                "signature of {} does not verify",
                self.txid
            )));
        }
        Ok(())
    }
}

/// Structural and cryptographic validation of a single transaction.
///
/// Covers the storage-free checks: txid integrity, origin proof and address
/// shape for both parties. Uniqueness against the transaction index and
/// spending against pools are separate concerns of the callers that hold
/// those stores.
pub fn validate_transaction(
    transaction: &Transaction,
    block_height: u64,
    legacy_signature_height: u64,
) -> Result<()> {
    if !transaction.validate_txid() {
        return Err(NodeError::validation(format!(
            "txid {} does not match content",
            transaction.txid
        )));
    }

    transaction.validate_origin(block_height, legacy_signature_height)?;

    if !validate_address(&transaction.sender) {
        return Err(NodeError::validation(format!(
            "invalid sender {}",
            transaction.sender
        )));
    }
    if !transaction.is_burn() && !validate_address(&transaction.recipient) {
        return Err(NodeError::validation(format!(
            "invalid recipient {}",
            transaction.recipient
        )));
    }

    Ok(())
}
