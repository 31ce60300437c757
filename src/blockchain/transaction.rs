use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::crypto::{canonical_json, verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Sender identity of value-minting mining rewards
///
/// Transactions from this sender carry no signature and are admitted without
/// any balance or signature check.
pub const REWARD_SENDER: &str = "Mining Reward";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Represents a value transfer in the ledger
///
/// Equality compares every field, which is the identity used when checking
/// whether a peer already holds a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Sender's address
    #[schema(value_type = String)]
    pub sender_address: Address,

    /// Recipient's address
    #[schema(value_type = String)]
    pub recipient_address: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Unique identifier for the transaction
    pub txid: String,

    /// Digital signature over the canonical encoding of the other fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub signature: Option<DigitalSignature>,
}

/// The signed portion of a transaction
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    sender_address: &'a Address,
    recipient_address: &'a Address,
    amount: f64,
    txid: &'a str,
}

/// Generates a fresh transaction id (uuid v4, no hyphens)
pub fn new_txid() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Transaction {
    /// Creates a new unsigned transaction
    pub fn new(sender_address: Address, recipient_address: Address, amount: f64, txid: String) -> Self {
        Transaction {
            sender_address,
            recipient_address,
            amount,
            txid,
            signature: None,
        }
    }

    /// Creates a new mining reward transaction
    pub fn new_reward(recipient_address: Address, amount: f64) -> Self {
        Transaction::new(Address::from(REWARD_SENDER), recipient_address, amount, new_txid())
    }

    /// Checks if the transaction is a mining reward
    pub fn is_reward(&self) -> bool {
        self.sender_address.0 == REWARD_SENDER
    }

    /// Checks the fields a caller is responsible for before any ledger logic runs
    pub fn check_well_formed(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(TransactionError::MalformedInput(format!(
                "amount must be a non-negative number, got {}",
                self.amount
            )));
        }

        if self.txid.is_empty() {
            return Err(TransactionError::MalformedInput("txid must not be empty".to_string()));
        }

        if self.sender_address.0.is_empty() || self.recipient_address.0.is_empty() {
            return Err(TransactionError::MalformedInput(
                "sender and recipient addresses must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Canonical bytes that are signed and verified
    pub fn signing_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let payload = SigningPayload {
            sender_address: &self.sender_address,
            recipient_address: &self.recipient_address,
            amount: self.amount,
            txid: &self.txid,
        };

        Ok(canonical_json(&payload)?)
    }

    /// Signs the transaction with a wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if wallet.address() != &self.sender_address {
            return Err(TransactionError::InvalidAddress(
                "Wallet address does not match sender address".to_string(),
            ));
        }

        let message = self.signing_bytes()?;
        self.signature = Some(wallet.sign(&message));

        Ok(())
    }

    /// Verifies the transaction's signature against the sender address
    ///
    /// An undecodable sender address is reported as `InvalidAddress`; a missing
    /// or non-matching signature as `InvalidSignature`.
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        let signature = self.signature.as_ref().ok_or(TransactionError::InvalidSignature)?;

        let public_key = self
            .sender_address
            .to_public_key()
            .map_err(|e| TransactionError::InvalidAddress(e.to_string()))?;

        let message = self.signing_bytes()?;

        if verify_signature(&message, signature, &public_key) {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature)
        }
    }

    /// Whether `address` is the sender or the recipient
    pub fn involves(&self, address: &Address) -> bool {
        &self.sender_address == address || &self.recipient_address == address
    }

    /// Whether both transactions carry the same signed fields
    ///
    /// The signature itself is ignored, so a re-signed copy still counts as the same transfer.
    pub fn same_transfer(&self, other: &Transaction) -> bool {
        self.txid == other.txid
            && self.sender_address == other.sender_address
            && self.recipient_address == other.recipient_address
            && self.amount == other.amount
    }
}
