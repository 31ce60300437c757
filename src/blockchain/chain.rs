use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use log::{debug, info, warn};
use thiserror::Error;

use super::block::Block;
use super::crypto::{Address, CryptoError};
use super::ledger::Ledger;
use super::peers::{normalize_address, PeerClient, PeerError, PeerRegistry};
use super::pow::ProofOfWork;
use super::transaction::{Transaction, TransactionError};
use super::validation::{validate_chain, ValidationError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Peer error: {0}")]
    PeerError(#[from] PeerError),

    #[error("Invalid chain: {0}")]
    ChainInvalid(#[from] ValidationError),

    #[error("Mining cancelled by shutdown")]
    MiningCancelled,

    #[error("System error: {0}")]
    SystemError(String),
}

/// Node parameters fixed at start-up
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Puzzle every block must solve
    pub pow: ProofOfWork,

    /// Amount minted to `reward_address` per sealed block
    pub mining_reward: f64,

    pub reward_address: Address,

    /// This node's own `host:port`, never contacted as a peer
    pub self_address: Option<String>,
}

/// Everything that mutates, behind one lock
#[derive(Debug)]
struct NodeState {
    ledger: Ledger,
    peers: PeerRegistry,
}

/// Result of a consensus round
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub replaced: bool,
    pub chain: Vec<Block>,
}

/// Represents the blockchain node: chain, pending pool and peer registry
///
/// All three are serialized through a single mutex. Network calls and the
/// proof of work search never run while it is held.
pub struct Blockchain {
    state: Mutex<NodeState>,
    settings: NodeSettings,
    peer_client: Arc<dyn PeerClient>,
    shutdown: Arc<AtomicBool>,
}

impl Blockchain {
    /// Creates a node with a genesis block
    ///
    /// # Arguments
    ///
    /// * `settings` - Puzzle, reward and own address of this node
    /// * `peer_client` - Transport used for every call to another node
    ///
    /// # Returns
    ///
    /// A new node whose registry holds only its own address, if configured
    pub fn new(settings: NodeSettings, peer_client: Arc<dyn PeerClient>) -> Result<Self, BlockchainError> {
        let mut peers = PeerRegistry::new();
        if let Some(self_address) = &settings.self_address {
            peers.insert(self_address.clone());
        }

        Ok(Blockchain {
            state: Mutex::new(NodeState {
                ledger: Ledger::new()?,
                peers,
            }),
            settings,
            peer_client,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        // No mutation can panic halfway, so a poisoned guard still holds consistent state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Known peers other than this node
    fn remote_peers(&self) -> Vec<String> {
        self.state()
            .peers
            .snapshot()
            .into_iter()
            .filter(|peer| Some(peer) != self.settings.self_address.as_ref())
            .collect()
    }

    fn prune_peers(&self, unreachable: &[String]) {
        if unreachable.is_empty() {
            return;
        }

        let removed = self.state().peers.prune(unreachable);
        if removed > 0 {
            warn!("Pruned unreachable peers: {}", unreachable.join(", "));
        }
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.state().ledger.chain().to_vec()
    }

    pub fn get_last_block(&self) -> Block {
        self.state().ledger.last_block().clone()
    }

    /// Gets all pending transactions
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.state().ledger.pending().to_vec()
    }

    /// Gets every confirmed transaction, oldest first
    pub fn get_posted_transactions(&self) -> Vec<Transaction> {
        self.state().ledger.confirmed_transactions().cloned().collect()
    }

    pub fn get_balance(&self, address: &Address) -> f64 {
        self.state().ledger.balance(address)
    }

    pub fn get_history(&self, address: &Address) -> Vec<Transaction> {
        self.state().ledger.history(address)
    }

    pub fn get_nodes(&self) -> Vec<String> {
        self.state().peers.snapshot()
    }

    /// Validates a transaction and adds it to the pending pool
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to admit
    ///
    /// # Returns
    ///
    /// The index of the block expected to include it, or the reason it was rejected
    pub fn add_transaction(&self, transaction: Transaction) -> Result<u64, BlockchainError> {
        if transaction.is_reward() {
            warn!(
                "Admitting unsigned mining reward {} of {} to {}",
                transaction.txid, transaction.amount, transaction.recipient_address
            );
        }

        let txid = transaction.txid.clone();
        let block_index = self.state().ledger.admit(transaction)?;
        info!("Transaction {} will be posted to block {}", txid, block_index);

        Ok(block_index)
    }

    /// Forwards a transaction to every peer not already holding it pending
    ///
    /// Peers that cannot be reached are pruned.
    pub async fn broadcast_transaction(&self, transaction: &Transaction) {
        let peers = self.remote_peers();

        let results = join_all(peers.iter().map(|peer| async move {
            let pending = self.peer_client.fetch_pending(peer).await?;
            if !pending.contains(transaction) {
                debug!("Forwarding transaction {} to {}", transaction.txid, peer);
                self.peer_client.submit_transaction(peer, transaction).await?;
            }
            Ok::<_, PeerError>(())
        }))
        .await;

        self.prune_peers(&failed_peers(&peers, results));
    }

    /// Mines a new block with the pending transactions and a reward
    ///
    /// The puzzle is solved on a blocking worker without holding the lock. If
    /// the tail block changed meanwhile (another block sealed or the chain
    /// replaced) the solution is discarded and the search restarts.
    ///
    /// # Returns
    ///
    /// The sealed block, or `MiningCancelled` once [`Blockchain::shutdown`] is called
    pub async fn mine_block(&self) -> Result<Block, BlockchainError> {
        loop {
            let tail = self.get_last_block();
            let pow = self.settings.pow.clone();
            let cancel = self.shutdown.clone();
            let (previous_nonce, previous_hash) = (tail.nonce, tail.hash.clone());

            let nonce = tokio::task::spawn_blocking(move || pow.solve_until(previous_nonce, &previous_hash, &cancel))
                .await
                .map_err(|e| BlockchainError::SystemError(e.to_string()))?
                .ok_or(BlockchainError::MiningCancelled)?;

            let sealed = {
                let mut state = self.state();
                if state.ledger.last_block().hash == tail.hash {
                    let reward =
                        Transaction::new_reward(self.settings.reward_address.clone(), self.settings.mining_reward);
                    state.ledger.admit(reward)?;
                    Some(state.ledger.seal(nonce)?)
                } else {
                    None
                }
            };

            match sealed {
                Some(block) => {
                    info!(
                        "Forged block {} with {} transactions (nonce {})",
                        block.index,
                        block.transactions.len(),
                        block.nonce
                    );
                    return Ok(block);
                }
                None => warn!("Chain tail moved while mining on block {}, retrying", tail.index),
            }
        }
    }

    /// Asks every peer to run consensus, typically right after mining
    pub async fn notify_peers_to_resolve(&self) {
        let peers = self.remote_peers();

        let results = join_all(peers.iter().map(|peer| self.peer_client.request_resolve(peer))).await;

        self.prune_peers(&failed_peers(&peers, results));
    }

    /// Longest-valid-chain consensus
    ///
    /// Fetches every peer's chain, drops peers that cannot be reached, and
    /// adopts the longest chain that is strictly longer than ours and valid.
    /// Adoption clears the pending pool.
    ///
    /// # Returns
    ///
    /// Whether the chain was replaced, along with the chain held afterwards
    pub async fn resolve_conflicts(&self) -> ResolveOutcome {
        let peers = self.remote_peers();

        let results = join_all(peers.iter().map(|peer| self.peer_client.fetch_chain(peer))).await;

        let mut offline = Vec::new();
        let mut best: Option<Vec<Block>> = None;
        let mut best_length = self.state().ledger.chain().len();

        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(snapshot) => {
                    let length = snapshot.chain.len();
                    if length != snapshot.length {
                        debug!("Peer {} reported length {} for a chain of {}", peer, snapshot.length, length);
                    }

                    if length > best_length {
                        match self.check_candidate(snapshot.chain) {
                            Ok(chain) => {
                                best_length = length;
                                best = Some(chain);
                            }
                            Err(err) => warn!("Ignoring chain of length {} from {}: {}", length, peer, err),
                        }
                    }
                }
                Err(err) => {
                    debug!("{}", err);
                    offline.push(peer.clone());
                }
            }
        }

        let mut state = self.state();
        state.peers.prune(&offline);
        if !offline.is_empty() {
            warn!("Pruned unreachable peers: {}", offline.join(", "));
        }

        let replaced = match best {
            // Our chain may have grown while the lock was released
            Some(chain) if chain.len() > state.ledger.chain().len() => {
                info!(
                    "Replacing chain of length {} with one of length {}",
                    state.ledger.chain().len(),
                    chain.len()
                );
                state.ledger.replace(chain);
                true
            }
            _ => false,
        };

        ResolveOutcome {
            replaced,
            chain: state.ledger.chain().to_vec(),
        }
    }

    /// Registers a node and floods the membership to every known peer
    ///
    /// The new node must answer a liveness check. During the fan-out each peer
    /// is told about every node it is missing; peers that fail are pruned.
    ///
    /// # Arguments
    ///
    /// * `node_url` - URL of the node, e.g. `http://10.0.0.2:5000`
    ///
    /// # Returns
    ///
    /// The registered `host:port`, or why the node could not be registered
    pub async fn register_node(&self, node_url: &str) -> Result<String, BlockchainError> {
        let node = normalize_address(node_url)?;

        if Some(&node) != self.settings.self_address.as_ref() {
            self.peer_client.fetch_nodes(&node).await?;
        }

        if self.state().peers.insert(node.clone()) {
            info!("Registered node at {}", node);
        }

        let peers = self.remote_peers();
        let known = self.get_nodes();

        let results = join_all(peers.iter().map(|peer| {
            let known = &known;
            async move {
                let theirs = self.peer_client.fetch_nodes(peer).await?;
                for missing in known.iter().filter(|n| *n != peer && !theirs.contains(n)) {
                    debug!("Telling {} about {}", peer, missing);
                    self.peer_client
                        .register_node(peer, &format!("http://{}", missing))
                        .await?;
                }
                Ok::<_, PeerError>(())
            }
        }))
        .await;

        self.prune_peers(&failed_peers(&peers, results));

        Ok(node)
    }

    /// Stops any in-flight proof of work search
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Accepts a peer's chain only if it passes full validation
    fn check_candidate(&self, chain: Vec<Block>) -> Result<Vec<Block>, BlockchainError> {
        validate_chain(&chain, &self.settings.pow)?;
        Ok(chain)
    }
}

/// Peers whose call failed, in the order of `peers`
fn failed_peers(peers: &[String], results: Vec<Result<(), PeerError>>) -> Vec<String> {
    peers
        .iter()
        .zip(results)
        .filter_map(|(peer, result)| match result {
            Ok(()) => None,
            Err(err) => {
                debug!("{}", err);
                Some(peer.clone())
            }
        })
        .collect()
}
