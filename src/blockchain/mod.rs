// Blockchain module
//
// This module contains the ledger engine:
// - Cryptography utilities and canonical encoding
// - Transaction and block structures
// - Proof of work puzzle
// - Ledger (chain, pending pool, balances, admission)
// - Chain validation
// - Peer registry and peer client
// - The node itself, including consensus

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod peers;
pub mod pow;
pub mod transaction;
pub mod validation;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, NodeSettings};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use peers::{ChainSnapshot, HttpPeerClient, PeerClient, PeerError};
pub use pow::ProofOfWork;
pub use transaction::Transaction;
