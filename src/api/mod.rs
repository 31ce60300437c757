// API module
//
// HTTP/JSON surface of the node: request and response schemas, handlers
// and the route table

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
