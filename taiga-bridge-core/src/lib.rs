//! Transport-agnostic Taiga operations for the Taiga bridge.
//!
//! This library holds everything the MCP tools and the action proxy share:
//! parameter validation, status resolution, optimistic concurrency,
//! idempotent creates, the upstream Taiga client, JSON-RPC framing and the
//! streaming session registry. The `taiga-bridge` binary only adds the HTTP
//! surfaces on top.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod jsonrpc;
pub mod lifecycle;
pub mod model;
pub mod ops;
pub mod pagination;
pub mod params;
pub mod resolution;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, BridgeResult};
