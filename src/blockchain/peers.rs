use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use actix_web::http::Uri;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

/// Errors that can occur while talking to peers
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Invalid node address: {0}")]
    InvalidAddress(String),

    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },
}

impl PeerError {
    pub(crate) fn unreachable(peer: &str, reason: impl ToString) -> Self {
        PeerError::Unreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Reduces a node URL such as `http://10.0.0.2:5000/` to its `host:port` part
///
/// A scheme is required, mirroring how addresses are announced between nodes.
pub fn normalize_address(address: &str) -> Result<String, PeerError> {
    let uri: Uri = address
        .trim()
        .parse()
        .map_err(|_| PeerError::InvalidAddress(address.to_string()))?;

    match (uri.scheme(), uri.authority()) {
        (Some(_), Some(authority)) if !authority.host().is_empty() => Ok(authority.as_str().to_string()),
        _ => Err(PeerError::InvalidAddress(address.to_string())),
    }
}

/// The set of peer addresses (`host:port`) known to this node
///
/// May include the node's own address so that flood-fill propagates it;
/// callers are expected to skip it when contacting peers.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    nodes: HashSet<String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node; returns false if it was already known
    pub fn insert(&mut self, node: String) -> bool {
        self.nodes.insert(node)
    }

    /// Removes every node in `unreachable`
    pub fn prune<'a>(&mut self, unreachable: impl IntoIterator<Item = &'a String>) -> usize {
        let before = self.nodes.len();
        for node in unreachable {
            self.nodes.remove(node);
        }
        before - self.nodes.len()
    }

    /// Sorted copy of the membership, safe to iterate while the registry changes
    pub fn snapshot(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }
}

/// A peer's chain as served by its `/chain` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    pub length: usize,
}

/// Outbound calls one node makes to another
///
/// Every failure, including a timeout or a malformed reply, is reported as
/// [`PeerError::Unreachable`].
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetches the peer's registry; doubles as the liveness check
    async fn fetch_nodes(&self, peer: &str) -> Result<Vec<String>, PeerError>;

    /// Asks the peer to register `node_url`
    async fn register_node(&self, peer: &str, node_url: &str) -> Result<(), PeerError>;

    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError>;

    async fn fetch_pending(&self, peer: &str) -> Result<Vec<Transaction>, PeerError>;

    /// Forwards a transaction; a rejection by the peer is not an error
    async fn submit_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), PeerError>;

    /// Asks the peer to run consensus
    async fn request_resolve(&self, peer: &str) -> Result<(), PeerError>;
}

#[derive(Deserialize)]
struct NodesBody {
    nodes: Vec<String>,
}

#[derive(Deserialize)]
struct TransactionsBody {
    transactions: Vec<Transaction>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    node_address: &'a str,
}

/// [`PeerClient`] speaking the node HTTP/JSON API with a bounded timeout
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpPeerClient { client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, peer: &str, path: &str) -> Result<T, PeerError> {
        self.client
            .get(format!("http://{}{}", peer, path))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PeerError::unreachable(peer, e))?
            .json::<T>()
            .await
            .map_err(|e| PeerError::unreachable(peer, e))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_nodes(&self, peer: &str) -> Result<Vec<String>, PeerError> {
        let body: NodesBody = self.get_json(peer, "/nodes/get").await?;
        Ok(body.nodes)
    }

    async fn register_node(&self, peer: &str, node_url: &str) -> Result<(), PeerError> {
        self.client
            .post(format!("http://{}/nodes/register", peer))
            .json(&RegisterBody { node_address: node_url })
            .send()
            .await
            .map_err(|e| PeerError::unreachable(peer, e))?;
        Ok(())
    }

    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError> {
        self.get_json(peer, "/chain").await
    }

    async fn fetch_pending(&self, peer: &str) -> Result<Vec<Transaction>, PeerError> {
        let body: TransactionsBody = self.get_json(peer, "/transactions/pending").await?;
        Ok(body.transactions)
    }

    async fn submit_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), PeerError> {
        self.client
            .post(format!("http://{}/transactions/new", peer))
            .json(transaction)
            .send()
            .await
            .map_err(|e| PeerError::unreachable(peer, e))?;
        Ok(())
    }

    async fn request_resolve(&self, peer: &str) -> Result<(), PeerError> {
        self.client
            .get(format!("http://{}/nodes/resolve", peer))
            .send()
            .await
            .map_err(|e| PeerError::unreachable(peer, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("http://127.0.0.1:5000").unwrap(), "127.0.0.1:5000");
        assert_eq!(normalize_address("http://node-b:5001/").unwrap(), "node-b:5001");
        assert_eq!(normalize_address(" https://example.org ").unwrap(), "example.org");

        assert!(normalize_address("127.0.0.1:5000").is_err());
        assert!(normalize_address("not an address").is_err());
        assert!(normalize_address("").is_err());
    }

    #[test]
    fn test_registry_set_semantics() {
        let mut registry = PeerRegistry::new();
        assert!(registry.insert("b:1".to_string()));
        assert!(registry.insert("a:1".to_string()));
        assert!(!registry.insert("a:1".to_string()));

        assert_eq!(registry.snapshot(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn test_registry_prune() {
        let mut registry = PeerRegistry::new();
        registry.insert("a:1".to_string());
        registry.insert("b:1".to_string());

        let gone = vec!["a:1".to_string(), "zzz:9".to_string()];
        assert_eq!(registry.prune(&gone), 1);
        assert_eq!(registry.snapshot(), vec!["b:1".to_string()]);
    }
}
