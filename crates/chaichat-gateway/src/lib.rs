//! chaichat-gateway: HTTP API for the chaichat browser UI
//!
//! Exposes persona listing, chat turns with provider failover, and saved
//! sessions (with export and search) as JSON over HTTP.

pub mod auth;
pub mod protocol;
pub mod server;

pub use server::{GatewayServer, GatewayState};
