//! Gateway: the tenant-facing HTTP API in front of the session supervisor.
//!
//! Lifecycle:
//! 1. Open the session store and spawn the webhook dispatcher
//! 2. Build the supervisor and resume sessions that were connected at exit
//! 3. Serve `/session`, `/webhook`, `/chat` and `/admin` routes
//! 4. On SIGINT/SIGTERM stop every session, then drain queued webhooks
//!
//! Tenants authenticate with the `token` header (or query parameter); admin
//! routes compare the `Authorization` header with the configured admin token.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod error;
pub mod server;
pub mod session;
pub mod state;
pub mod webhook;

pub use {
    error::{ApiError, ApiResult},
    server::{build_gateway_app, open_store, start_gateway},
    state::GatewayState,
};
