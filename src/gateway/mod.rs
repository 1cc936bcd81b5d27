//! Networked dialogue sessions over WebSocket.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::{GatewayState, router, run_gateway, serve};
