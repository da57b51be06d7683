//! JSON-RPC over HTTP transport for the console and app-control services.
//!
//! Calls are `POST {endpoint}?pageId={session}` with a body of
//! `{"id", "method", "params"}`; responses carry either `result` or
//! `error: {code, msg}`.
mod client;
mod config;
pub(crate) mod wire;

pub use client::{JsonRpcClient, JsonRpcConnector};
pub use config::JsonRpcConfig;
