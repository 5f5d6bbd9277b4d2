//! Network layer: WebSocket sessions feeding the tick loop.

mod connection;
mod server;

pub use server::Server;
