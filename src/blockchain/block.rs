use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::{canonical_json, sha256_hex, CryptoError};
use super::transaction::Transaction;

/// Previous hash recorded in the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Index of the block in the chain (genesis is 1)
    pub index: u64,

    /// Timestamp when the block was sealed
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions in pool order at seal time
    pub transactions: Vec<Transaction>,

    /// Proof of work solution
    pub nonce: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of this block's other fields (calculated)
    pub hash: String,
}

/// The hashed portion of a block
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    transactions: &'a [Transaction],
    nonce: u64,
    previous_hash: &'a str,
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(index: u64, transactions: Vec<Transaction>, nonce: u64, previous_hash: String) -> Result<Self, CryptoError> {
        Self::with_timestamp(index, Utc::now(), transactions, nonce, previous_hash)
    }

    /// Creates a new block with an explicit timestamp
    pub fn with_timestamp(
        index: u64,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        nonce: u64,
        previous_hash: String,
    ) -> Result<Self, CryptoError> {
        let block = Block {
            index,
            timestamp,
            transactions,
            nonce,
            previous_hash,
            hash: String::new(),
        };

        let hash = block.calculate_hash()?;

        Ok(Block { hash, ..block })
    }

    /// Creates the genesis block
    pub fn genesis() -> Result<Self, CryptoError> {
        Block::new(1, Vec::new(), 0, GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Calculates the hash of the block
    ///
    /// SHA-256 hex digest of the canonical JSON of every field except `hash`.
    pub fn calculate_hash(&self) -> Result<String, CryptoError> {
        let header = BlockHeader {
            index: self.index,
            timestamp: &self.timestamp,
            transactions: &self.transactions,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
        };

        Ok(sha256_hex(&canonical_json(&header)?))
    }

    /// Whether the stored hash matches the block contents
    pub fn has_consistent_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.hash)
    }

    /// Whether this block has the shape of a genesis block
    pub fn is_genesis(&self) -> bool {
        self.index == 1 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}
