//! RPC Server - HTTP/JSON surface of a coprocessor node
//!
//! Exposes task submission, result polling, attestations, leader and status
//! queries over a shared `Coordinator`.

pub mod http_server;
pub mod methods;

pub use http_server::HttpServer;
pub use methods::RpcError;
