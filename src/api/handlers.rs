use std::fmt::Display;

use actix_web::{web, HttpResponse, Responder};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Block, Blockchain, BlockchainError, DigitalSignature, Transaction, Wallet};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Error body for rejected requests
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn bad_request(message: impl Display) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.to_string(),
    })
}

fn missing(field: &str) -> HttpResponse {
    bad_request(format!("Malformed input: missing field `{}`", field))
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// The length of the chain
    pub length: usize,
}

/// Response listing transactions
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

/// Request for the transaction endpoint
///
/// Fields are optional here so that a missing one is reported as malformed
/// input instead of a generic deserialization failure.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub sender_address: Option<String>,
    pub recipient_address: Option<String>,
    pub amount: Option<f64>,
    pub txid: Option<String>,

    /// Base64-url signature; omitted for mining rewards
    pub signature: Option<String>,
}

impl TransactionRequest {
    fn into_transaction(self) -> Result<Transaction, HttpResponse> {
        let sender_address = self.sender_address.ok_or_else(|| missing("senderAddress"))?;
        let recipient_address = self.recipient_address.ok_or_else(|| missing("recipientAddress"))?;
        let amount = self.amount.ok_or_else(|| missing("amount"))?;
        let txid = self.txid.ok_or_else(|| missing("txid"))?;

        let mut transaction = Transaction::new(Address(sender_address), Address(recipient_address), amount, txid);
        transaction.signature = self.signature.map(DigitalSignature);

        Ok(transaction)
    }
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub message: String,

    /// The index of the block expected to include this transaction
    pub block_index: u64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MineResponse {
    pub message: String,
    pub block_index: u64,
    pub block_transactions: Vec<Transaction>,
    pub block_nonce: u64,
    pub previous_hash: String,
}

/// Request naming a wallet address
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AddressRequest {
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub history: Vec<Transaction>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    /// The wallet's address (base64-url public key)
    pub address: String,

    /// The wallet's private key (base64-url)
    pub private_key: String,
}

/// Request for the node registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    /// Node URL, e.g. `http://127.0.0.1:5001`
    pub node_address: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodeResponse {
    pub message: String,
    pub nodes: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodesResponse {
    pub nodes: Vec<String>,
}

/// Response for the consensus endpoint
///
/// `newChain` is set when the chain was replaced, `chain` otherwise.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_chain: Option<Vec<Block>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<Block>>,
}

/// Register a peer node
///
/// Checks the node is reachable, adds it, and propagates membership to every known peer
#[utoipa::path(
    post,
    path = "/nodes/register",
    request_body = RegisterNodeRequest,
    responses(
        (status = 201, description = "Node registered", body = RegisterNodeResponse),
        (status = 400, description = "Missing, malformed or unreachable address", body = ErrorResponse)
    )
)]
pub async fn register_node(blockchain: BlockchainData, request: web::Json<RegisterNodeRequest>) -> impl Responder {
    let node_address = match request.into_inner().node_address {
        Some(address) => address,
        None => return missing("nodeAddress"),
    };

    match blockchain.register_node(&node_address).await {
        Ok(node) => HttpResponse::Created().json(RegisterNodeResponse {
            message: format!("Registered node at: {}.", node),
            nodes: blockchain.get_nodes(),
        }),
        Err(err) => {
            warn!("Failed to register {}: {}", node_address, err);
            bad_request(err)
        }
    }
}

/// List known peer nodes
#[utoipa::path(
    get,
    path = "/nodes/get",
    responses(
        (status = 200, description = "Known nodes", body = NodesResponse)
    )
)]
pub async fn get_nodes(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(NodesResponse {
        nodes: blockchain.get_nodes(),
    })
}

/// Run consensus against all peers
///
/// Adopts the longest valid peer chain if it is longer than ours
#[utoipa::path(
    get,
    path = "/nodes/resolve",
    responses(
        (status = 200, description = "Consensus result", body = ResolveResponse)
    )
)]
pub async fn resolve_nodes(blockchain: BlockchainData) -> impl Responder {
    let outcome = blockchain.resolve_conflicts().await;

    let response = if outcome.replaced {
        ResolveResponse {
            message: "Chain was replaced.".to_string(),
            new_chain: Some(outcome.chain),
            chain: None,
        }
    } else {
        ResolveResponse {
            message: "Chain was not replaced, current chain is the longest.".to_string(),
            new_chain: None,
            chain: Some(outcome.chain),
        }
    };

    HttpResponse::Ok().json(response)
}

/// Create a new wallet
///
/// Generates a key pair. The node does not keep the private key.
#[utoipa::path(
    post,
    path = "/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: wallet.export_secret_key(),
    })
}

/// Get wallet balance
///
/// Confirmed balance only; pending transactions do not count
#[utoipa::path(
    post,
    path = "/wallet/balance",
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Wallet balance", body = BalanceResponse),
        (status = 400, description = "No address supplied", body = ErrorResponse)
    )
)]
pub async fn get_wallet_balance(blockchain: BlockchainData, request: web::Json<AddressRequest>) -> impl Responder {
    match request.into_inner().address {
        Some(address) => HttpResponse::Ok().json(BalanceResponse {
            balance: blockchain.get_balance(&Address(address)),
        }),
        None => missing("address"),
    }
}

/// Get wallet history
///
/// Confirmed transactions sent or received by the address
#[utoipa::path(
    post,
    path = "/wallet/history",
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Wallet history", body = HistoryResponse),
        (status = 400, description = "No address supplied", body = ErrorResponse)
    )
)]
pub async fn get_wallet_history(blockchain: BlockchainData, request: web::Json<AddressRequest>) -> impl Responder {
    match request.into_inner().address {
        Some(address) => HttpResponse::Ok().json(HistoryResponse {
            history: blockchain.get_history(&Address(address)),
        }),
        None => missing("address"),
    }
}

/// Create a new transaction
///
/// Validates and pools a signed transaction, then forwards it to peers
#[utoipa::path(
    post,
    path = "/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Malformed, unfunded or badly signed transaction", body = ErrorResponse)
    )
)]
pub async fn new_transaction(blockchain: BlockchainData, request: web::Json<TransactionRequest>) -> impl Responder {
    let transaction = match request.into_inner().into_transaction() {
        Ok(transaction) => transaction,
        Err(response) => return response,
    };

    match blockchain.add_transaction(transaction.clone()) {
        Ok(block_index) => {
            blockchain.broadcast_transaction(&transaction).await;

            HttpResponse::Created().json(TransactionResponse {
                message: format!("Transaction will be posted to Block {}.", block_index),
                block_index,
            })
        }
        Err(err) => bad_request(err),
    }
}

/// Get all confirmed transactions
#[utoipa::path(
    get,
    path = "/transactions/posted",
    responses(
        (status = 200, description = "Confirmed transactions", body = TransactionsResponse)
    )
)]
pub async fn get_posted_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(TransactionsResponse {
        transactions: blockchain.get_posted_transactions(),
    })
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions", body = TransactionsResponse)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(TransactionsResponse {
        transactions: blockchain.get_pending_transactions(),
    })
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
    })
}

/// Mine a new block
///
/// Solves the puzzle, mints the reward, seals the pending pool and asks
/// every peer to resolve
#[utoipa::path(
    get,
    path = "/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 503, description = "Node is shutting down", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn mine_block(blockchain: BlockchainData) -> impl Responder {
    match blockchain.mine_block().await {
        Ok(block) => {
            blockchain.notify_peers_to_resolve().await;

            HttpResponse::Ok().json(MineResponse {
                message: "Forged new block".to_string(),
                block_index: block.index,
                block_transactions: block.transactions,
                block_nonce: block.nonce,
                previous_hash: block.previous_hash,
            })
        }
        Err(BlockchainError::MiningCancelled) => HttpResponse::ServiceUnavailable().json(ErrorResponse {
            error: BlockchainError::MiningCancelled.to_string(),
        }),
        Err(err) => {
            error!("Failed to mine block: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: format!("Failed to mine block: {}", err),
            })
        }
    }
}
