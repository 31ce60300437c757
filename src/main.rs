use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use blockchain::peers::normalize_address;
use blockchain::{Blockchain, HttpPeerClient, PeerClient};
use config::NodeConfig;

// Ask an active node to register us; its flood-fill then tells us about the rest of the network
async fn join_network(client: &HttpPeerClient, bootstrap: &str, advertise_url: &str) {
    let peer = match normalize_address(bootstrap) {
        Ok(peer) => peer,
        Err(err) => {
            warn!("Ignoring bootstrap node: {}", err);
            return;
        }
    };

    match client.register_node(&peer, advertise_url).await {
        Ok(()) => info!("Announced {} to bootstrap node {}", advertise_url, peer),
        Err(err) => warn!("Failed to contact bootstrap node: {}", err),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::register_node,
        api::handlers::get_nodes,
        api::handlers::resolve_nodes,
        api::handlers::create_wallet,
        api::handlers::get_wallet_balance,
        api::handlers::get_wallet_history,
        api::handlers::new_transaction,
        api::handlers::get_posted_transactions,
        api::handlers::get_pending_transactions,
        api::handlers::get_chain,
        api::handlers::mine_block
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::handlers::ErrorResponse,
            api::handlers::ChainResponse,
            api::handlers::TransactionsResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::AddressRequest,
            api::handlers::BalanceResponse,
            api::handlers::HistoryResponse,
            api::handlers::WalletResponse,
            api::handlers::RegisterNodeRequest,
            api::handlers::RegisterNodeResponse,
            api::handlers::NodesResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "0.1.0",
        description = "Proof-of-work ledger node with longest-chain consensus",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();
    let settings = config.node_settings().context("invalid node configuration")?;
    let client = HttpPeerClient::new(config.peer_timeout()).context("failed to build peer HTTP client")?;

    let blockchain = web::Data::new(
        Blockchain::new(settings, Arc::new(client.clone())).context("failed to create genesis block")?,
    );

    info!(
        "Node {} mining for {} with difficulty prefix {:?}",
        config.advertise_url(),
        config.reward_address,
        config.difficulty_prefix
    );
    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    let app_data = blockchain.clone();
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(app_data.clone())
            .configure(api::configure_routes)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()))
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
    .run();

    if let Some(bootstrap) = config.bootstrap.clone() {
        let advertise_url = config.advertise_url();
        actix_web::rt::spawn(async move {
            join_network(&client, &bootstrap, &advertise_url).await;
        });
    }

    // Stop in-flight proof of work searches as soon as shutdown starts
    let stopping = blockchain.clone();
    actix_web::rt::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, cancelling mining");
            stopping.shutdown();
        }
    });

    server.await?;
    blockchain.shutdown();

    Ok(())
}
