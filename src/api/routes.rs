use actix_web::{error::InternalError, web};

use super::handlers;

/// Configures the API routes
///
/// Bodies that are not valid JSON for the endpoint are answered with a 400
/// `{ "error": ... }` before any handler runs.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response = handlers::bad_request(format!("Malformed input: {}", err));
        InternalError::from_response(err, response).into()
    });

    cfg.app_data(json_config)
        .route("/nodes/register", web::post().to(handlers::register_node))
        .route("/nodes/get", web::get().to(handlers::get_nodes))
        .route("/nodes/resolve", web::get().to(handlers::resolve_nodes))
        .route("/wallet/new", web::post().to(handlers::create_wallet))
        .route("/wallet/balance", web::post().to(handlers::get_wallet_balance))
        .route("/wallet/history", web::post().to(handlers::get_wallet_history))
        .route("/transactions/new", web::post().to(handlers::new_transaction))
        .route("/transactions/posted", web::get().to(handlers::get_posted_transactions))
        .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
        .route("/chain", web::get().to(handlers::get_chain))
        .route("/mine", web::get().to(handlers::mine_block));
}
