//! HTTP/WebSocket surface of the Strata backend.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{run_server, ServerConfig};
pub use state::AppState;
