use thiserror::Error;

use super::block::Block;
use super::pow::ProofOfWork;

/// The first rule a chain breaks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("chain is empty")]
    Empty,

    #[error("first block is not a genesis block")]
    MalformedGenesis,

    #[error("block {index} does not follow block {previous}")]
    OutOfSequence { index: u64, previous: u64 },

    #[error("block {0} is older than its predecessor")]
    TimestampRegression(u64),

    #[error("block {0} hash does not match its contents")]
    HashMismatch(u64),

    #[error("block {0} does not link to its predecessor")]
    BrokenLink(u64),

    #[error("block {0} carries an invalid proof of work")]
    InsufficientWork(u64),
}

/// Checks a whole chain from genesis forward
///
/// The first block must have the genesis shape. Every block must carry the
/// hash of its own contents. For each consecutive pair the index must step by
/// one, the timestamp must not go backwards, the successor must link to the
/// predecessor's hash, and the successor's nonce must solve the puzzle posed
/// by the predecessor. Never mutates anything.
///
/// # Arguments
///
/// * `chain` - Blocks ordered from genesis to tail
/// * `pow` - The puzzle every non-genesis block must solve
///
/// # Returns
///
/// `Ok(())` for a valid chain, otherwise the first rule it breaks
pub fn validate_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), ValidationError> {
    let genesis = chain.first().ok_or(ValidationError::Empty)?;

    if !genesis.is_genesis() || !genesis.has_consistent_hash() {
        return Err(ValidationError::MalformedGenesis);
    }

    for pair in chain.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        if current.index != previous.index + 1 {
            return Err(ValidationError::OutOfSequence {
                index: current.index,
                previous: previous.index,
            });
        }

        if current.timestamp < previous.timestamp {
            return Err(ValidationError::TimestampRegression(current.index));
        }

        if !current.has_consistent_hash() {
            return Err(ValidationError::HashMismatch(current.index));
        }

        match previous.calculate_hash() {
            Ok(hash) if hash == current.previous_hash => {}
            _ => return Err(ValidationError::BrokenLink(current.index)),
        }

        if !pow.is_valid(previous.nonce, &current.previous_hash, current.nonce) {
            return Err(ValidationError::InsufficientWork(current.index));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::transaction::Transaction;
    use chrono::Duration;

    fn is_valid_chain(chain: &[Block], pow: &ProofOfWork) -> bool {
        validate_chain(chain, pow).is_ok()
    }

    fn pow() -> ProofOfWork {
        ProofOfWork::new("0")
    }

    fn mined_chain(blocks: usize) -> Vec<Block> {
        let pow = pow();
        let mut chain = vec![Block::genesis().unwrap()];

        for _ in 0..blocks {
            let last = chain.last().unwrap().clone();
            let nonce = pow.solve(last.nonce, &last.hash);
            let reward = Transaction::new_reward(Address::from("miner"), 1.0);
            let block = Block::with_timestamp(
                last.index + 1,
                last.timestamp + Duration::milliseconds(1),
                vec![reward],
                nonce,
                last.hash.clone(),
            )
            .unwrap();
            chain.push(block);
        }

        chain
    }

    /// Applies `mutate` to block `i` and returns the resulting chain
    fn mutated(chain: &[Block], i: usize, mutate: impl Fn(&mut Block)) -> Vec<Block> {
        let mut chain = chain.to_vec();
        mutate(&mut chain[i]);
        chain
    }

    #[test]
    fn test_valid_chains() {
        assert!(is_valid_chain(&mined_chain(0), &pow()));
        assert!(is_valid_chain(&mined_chain(3), &pow()));
    }

    #[test]
    fn test_empty_chain_invalid() {
        assert!(!is_valid_chain(&[], &pow()));
        assert_eq!(validate_chain(&[], &pow()), Err(ValidationError::Empty));
    }

    #[test]
    fn test_reports_first_broken_rule() {
        let chain = mined_chain(3);
        let pow = pow();

        assert_eq!(
            validate_chain(&mutated(&chain, 0, |b| b.nonce = 7), &pow),
            Err(ValidationError::MalformedGenesis)
        );
        assert_eq!(
            validate_chain(&mutated(&chain, 2, |b| b.index = 9), &pow),
            Err(ValidationError::OutOfSequence { index: 9, previous: 2 })
        );
        assert_eq!(
            validate_chain(&mutated(&chain, 2, |b| b.transactions.clear()), &pow),
            Err(ValidationError::HashMismatch(3))
        );
        assert_eq!(
            validate_chain(&chain, &ProofOfWork::new("ffffff")),
            Err(ValidationError::InsufficientWork(2))
        );
    }

    #[test]
    fn test_any_single_field_mutation_invalidates() {
        let chain = mined_chain(3);
        let pow = pow();

        for i in 1..chain.len() {
            assert!(!is_valid_chain(&mutated(&chain, i, |b| b.index += 1), &pow));
            assert!(!is_valid_chain(&mutated(&chain, i, |b| b.index -= 1), &pow));
            assert!(!is_valid_chain(
                &mutated(&chain, i, |b| b.timestamp = b.timestamp + Duration::seconds(1)),
                &pow
            ));
            assert!(!is_valid_chain(
                &mutated(&chain, i, |b| b.transactions[0].amount = 1000.0),
                &pow
            ));
            assert!(!is_valid_chain(&mutated(&chain, i, |b| b.transactions.clear()), &pow));
            assert!(!is_valid_chain(&mutated(&chain, i, |b| b.nonce += 1), &pow));
            assert!(!is_valid_chain(
                &mutated(&chain, i, |b| b.previous_hash = "f".repeat(64)),
                &pow
            ));
            assert!(!is_valid_chain(&mutated(&chain, i, |b| b.hash = "0".repeat(64)), &pow));
        }
    }

    #[test]
    fn test_rehashed_forgery_breaks_link() {
        let chain = mined_chain(3);
        // Tamper with block 2 and recompute its own hash; block 3 no longer links
        let forged = mutated(&chain, 1, |b| {
            b.transactions[0].amount = 50.0;
            b.hash = b.calculate_hash().unwrap();
        });
        assert!(!is_valid_chain(&forged, &pow()));
        assert_eq!(validate_chain(&forged, &pow()), Err(ValidationError::BrokenLink(3)));
    }

    #[test]
    fn test_rejects_insufficient_work() {
        let chain = mined_chain(2);
        assert!(!is_valid_chain(&chain, &ProofOfWork::new("ffffff")));
    }
}
