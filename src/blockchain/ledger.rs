use log::{debug, warn};

use super::block::Block;
use super::crypto::{Address, CryptoError};
use super::transaction::{Transaction, TransactionError};

/// The chain of blocks together with the pool of admitted, unsealed transactions
///
/// Balances are never stored; they are replayed from confirmed transactions.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
}

impl Ledger {
    /// Creates a ledger holding only a fresh genesis block
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Ledger {
            chain: vec![Block::genesis()?],
            pending: Vec::new(),
        })
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// The tail block; the chain always holds at least the genesis block
    pub fn last_block(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Every transaction sealed in the chain, oldest first
    pub fn confirmed_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.chain.iter().flat_map(|block| block.transactions.iter())
    }

    /// Confirmed incoming minus confirmed outgoing amounts for `address`
    pub fn balance(&self, address: &Address) -> f64 {
        let mut balance = 0.0;

        for tx in self.confirmed_transactions() {
            if &tx.recipient_address == address {
                balance += tx.amount;
            }
            if &tx.sender_address == address {
                balance -= tx.amount;
            }
        }

        balance
    }

    /// Confirmed transactions where `address` is sender or recipient
    pub fn history(&self, address: &Address) -> Vec<Transaction> {
        self.confirmed_transactions()
            .filter(|tx| tx.involves(address))
            .cloned()
            .collect()
    }

    fn pending_outflow(&self, address: &Address) -> f64 {
        self.pending
            .iter()
            .filter(|tx| &tx.sender_address == address)
            .map(|tx| tx.amount)
            .sum()
    }

    // Pending or confirmed with the same signed fields
    fn contains_transfer(&self, transaction: &Transaction) -> bool {
        self.pending.iter().any(|tx| tx.same_transfer(transaction))
            || self.confirmed_transactions().any(|tx| tx.same_transfer(transaction))
    }

    /// Validates a transaction and appends it to the pending pool
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to admit; rewards skip the funds and signature checks
    ///
    /// # Returns
    ///
    /// The index of the block the transaction is expected to land in. This is
    /// advisory: mining order and chain replacement can move it. On rejection
    /// the pool is left untouched.
    pub fn admit(&mut self, transaction: Transaction) -> Result<u64, TransactionError> {
        transaction.check_well_formed()?;

        if self.contains_transfer(&transaction) {
            return Err(TransactionError::DuplicateTransaction(transaction.txid));
        }

        if transaction.is_reward() {
            debug!("Admitting reward of {} to {}", transaction.amount, transaction.recipient_address);
        } else {
            // Pending spends are subtracted so concurrent transfers cannot jointly overdraw
            let available = self.balance(&transaction.sender_address)
                - self.pending_outflow(&transaction.sender_address);

            if transaction.amount > available {
                warn!(
                    "Rejected transaction {}: {} requested, {} available",
                    transaction.txid, transaction.amount, available
                );
                return Err(TransactionError::InsufficientFunds {
                    required: transaction.amount,
                    available,
                });
            }

            transaction.verify_signature()?;
        }

        self.pending.push(transaction);

        Ok(self.next_index())
    }

    pub fn next_index(&self) -> u64 {
        self.chain.len() as u64 + 1
    }

    /// Seals the pending pool into a new block on top of the tail
    ///
    /// The pool is drained into the block in insertion order.
    pub fn seal(&mut self, nonce: u64) -> Result<Block, CryptoError> {
        let previous_hash = self.last_block().hash.clone();
        let block = Block::new(self.next_index(), self.pending.clone(), nonce, previous_hash)?;

        self.pending.clear();
        self.chain.push(block.clone());
        Ok(block)
    }

    /// Replaces the whole chain and empties the pending pool
    ///
    /// Pending transactions are dropped, not replayed against the new chain.
    pub fn replace(&mut self, chain: Vec<Block>) {
        self.chain = chain;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::new_txid;

    fn transfer(sender: &Wallet, recipient: &Address, amount: f64) -> Transaction {
        let mut tx = Transaction::new(sender.address().clone(), recipient.clone(), amount, new_txid());
        tx.sign(sender).unwrap();
        tx
    }

    fn funded(address: &Address, amount: f64) -> Ledger {
        let mut ledger = Ledger::new().unwrap();
        ledger.admit(Transaction::new_reward(address.clone(), amount)).unwrap();
        ledger.seal(0).unwrap();
        ledger
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new().unwrap();
        assert_eq!(ledger.chain().len(), 1);
        assert!(ledger.last_block().is_genesis());
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_reward_counts_only_after_seal() {
        let miner = Address::from("R");
        let mut ledger = Ledger::new().unwrap();

        assert_eq!(ledger.admit(Transaction::new_reward(miner.clone(), 1.0)).unwrap(), 2);
        assert_eq!(ledger.balance(&miner), 0.0);

        let block = ledger.seal(0).unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(block.previous_hash, ledger.chain()[0].hash);
        assert_eq!(ledger.balance(&miner), 1.0);
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_insufficient_funds_leaves_pool_unchanged() {
        let sender = Wallet::new();
        let recipient = Address::from("Y");
        let mut ledger = funded(sender.address(), 10.0);

        let result = ledger.admit(transfer(&sender, &recipient, 15.0));
        assert!(matches!(result, Err(TransactionError::InsufficientFunds { .. })));
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.balance(sender.address()), 10.0);
    }

    #[test]
    fn test_valid_transfer_and_balances() {
        let sender = Wallet::new();
        let recipient = Address::from("Y");
        let mut ledger = funded(sender.address(), 10.0);

        assert_eq!(ledger.admit(transfer(&sender, &recipient, 4.0)).unwrap(), 3);
        assert_eq!(ledger.pending().len(), 1);
        // Pending transfers do not move confirmed balances
        assert_eq!(ledger.balance(sender.address()), 10.0);
        assert_eq!(ledger.balance(&recipient), 0.0);

        ledger.seal(0).unwrap();
        assert_eq!(ledger.balance(sender.address()), 6.0);
        assert_eq!(ledger.balance(&recipient), 4.0);
        assert_eq!(ledger.history(&recipient).len(), 1);
        assert_eq!(ledger.history(sender.address()).len(), 2);
    }

    #[test]
    fn test_pending_spends_cannot_jointly_overdraw() {
        let sender = Wallet::new();
        let recipient = Address::from("Y");
        let mut ledger = funded(sender.address(), 10.0);

        ledger.admit(transfer(&sender, &recipient, 7.0)).unwrap();
        let second = ledger.admit(transfer(&sender, &recipient, 7.0));
        assert!(matches!(second, Err(TransactionError::InsufficientFunds { .. })));
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let sender = Wallet::new();
        let mut ledger = funded(sender.address(), 10.0);

        let mut tx = transfer(&sender, &Address::from("Y"), 1.0);
        tx.amount = 2.0;
        assert!(matches!(ledger.admit(tx), Err(TransactionError::InvalidSignature)));
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_funds_checked_before_signature() {
        let mut ledger = Ledger::new().unwrap();
        let tx = Transaction::new(Address::from("nobody"), Address::from("Y"), 1.0, new_txid());
        assert!(matches!(ledger.admit(tx), Err(TransactionError::InsufficientFunds { .. })));
    }

    #[test]
    fn test_duplicate_txid_rejected() {
        let sender = Wallet::new();
        let mut ledger = funded(sender.address(), 10.0);

        let tx = transfer(&sender, &Address::from("Y"), 1.0);
        ledger.admit(tx.clone()).unwrap();
        assert!(matches!(ledger.admit(tx.clone()), Err(TransactionError::DuplicateTransaction(_))));

        ledger.seal(0).unwrap();
        assert!(matches!(ledger.admit(tx), Err(TransactionError::DuplicateTransaction(_))));
    }

    #[test]
    fn test_colliding_txid_from_another_sender_admitted() {
        let alice = Wallet::new();
        let mallory = Wallet::new();
        let bob = Address::from("bob");

        let mut ledger = Ledger::new().unwrap();
        ledger.admit(Transaction::new_reward(alice.address().clone(), 5.0)).unwrap();
        ledger.admit(Transaction::new_reward(mallory.address().clone(), 5.0)).unwrap();
        ledger.seal(0).unwrap();

        let mut squatter = Transaction::new(mallory.address().clone(), bob.clone(), 1.0, "shared".to_string());
        squatter.sign(&mallory).unwrap();
        ledger.admit(squatter).unwrap();

        let mut payment = Transaction::new(alice.address().clone(), bob.clone(), 2.0, "shared".to_string());
        payment.sign(&alice).unwrap();
        assert_eq!(ledger.admit(payment.clone()).unwrap(), 3);
        assert_eq!(ledger.pending().len(), 2);

        match ledger.admit(payment) {
            Err(TransactionError::DuplicateTransaction(txid)) => assert_eq!(txid, "shared"),
            other => panic!("expected duplicate rejection, got {:?}", other),
        }
        assert_eq!(ledger.pending().len(), 2);
    }

    #[test]
    fn test_replace_clears_pool() {
        let mut ledger = Ledger::new().unwrap();
        ledger.admit(Transaction::new_reward(Address::from("R"), 1.0)).unwrap();

        let other = funded(&Address::from("Z"), 5.0);
        ledger.replace(other.chain().to_vec());

        assert_eq!(ledger.chain().len(), 2);
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.balance(&Address::from("Z")), 5.0);
    }
}
