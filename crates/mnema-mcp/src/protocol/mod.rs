//! JSON-RPC protocol: envelope types and the two framings

#[cfg(feature = "http")]
pub mod http;
pub mod stdio;
pub mod types;
