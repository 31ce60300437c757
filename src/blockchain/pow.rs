use std::sync::atomic::{AtomicBool, Ordering};

use super::crypto::sha256_hex;

/// Required hash prefix when none is configured
pub const DEFAULT_DIFFICULTY_PREFIX: &str = "0000";

/// How many attempts the solver makes between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Fixed-difficulty proof of work puzzle
///
/// A nonce solves the puzzle for a tail block when
/// `sha256_hex("{previous_nonce}{previous_hash}{nonce}")` starts with the
/// required prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    prefix: String,
}

impl ProofOfWork {
    pub fn new(prefix: impl Into<String>) -> Self {
        ProofOfWork { prefix: prefix.into() }
    }

    /// Checks a candidate nonce without solving
    pub fn is_valid(&self, previous_nonce: u64, previous_hash: &str, nonce: u64) -> bool {
        let attempt = format!("{}{}{}", previous_nonce, previous_hash, nonce);
        sha256_hex(attempt.as_bytes()).starts_with(&self.prefix)
    }

    /// Finds the smallest valid nonce by counting up from zero
    ///
    /// There is no upper bound: an unsatisfiable prefix never returns.
    pub fn solve(&self, previous_nonce: u64, previous_hash: &str) -> u64 {
        let never = AtomicBool::new(false);
        // Only cancellation can stop the search, and `never` is never set
        self.solve_until(previous_nonce, previous_hash, &never)
            .unwrap_or_default()
    }

    /// Like [`solve`](Self::solve) but gives up with `None` once `cancel` is set
    pub fn solve_until(&self, previous_nonce: u64, previous_hash: &str, cancel: &AtomicBool) -> Option<u64> {
        let mut nonce = 0u64;

        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return None;
            }

            if self.is_valid(previous_nonce, previous_hash, nonce) {
                return Some(nonce);
            }

            nonce += 1;
        }
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        ProofOfWork::new(DEFAULT_DIFFICULTY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_is_valid() {
        let pow = ProofOfWork::new("00");

        for (previous_nonce, previous_hash) in [(0, "0"), (17, "abc"), (123456, "ffff")] {
            let nonce = pow.solve(previous_nonce, previous_hash);
            assert!(pow.is_valid(previous_nonce, previous_hash, nonce));
        }
    }

    #[test]
    fn test_solve_finds_smallest_nonce() {
        let pow = ProofOfWork::new("0");
        let nonce = pow.solve(5, "hash");

        for smaller in 0..nonce {
            assert!(!pow.is_valid(5, "hash", smaller));
        }
    }

    #[test]
    fn test_is_valid_matches_definition() {
        let pow = ProofOfWork::new("0");
        let nonce = pow.solve(1, "h");
        let digest = sha256_hex(format!("1h{}", nonce).as_bytes());
        assert!(digest.starts_with('0'));
    }

    #[test]
    fn test_cancelled_solve_returns_none() {
        // A prefix that no hex digest can start with
        let pow = ProofOfWork::new("z");
        let cancel = AtomicBool::new(true);
        assert_eq!(pow.solve_until(0, "0", &cancel), None);
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(ProofOfWork::default(), ProofOfWork::new("0000"));
    }
}
