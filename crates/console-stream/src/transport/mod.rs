//! Concrete RPC collaborators.
pub mod jsonrpc;
