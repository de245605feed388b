//! Transport implementations for provider backends.
//!
//! Each transport is one closed way of reaching a model:
//! - [`CliTransport`] — subprocess with the prompt on stdin and a JSON
//!   completion on stdout
//! - [`McpTransport`] — JSON-RPC tool server over a persistent HTTP
//!   connection
//! - [`SdkTransport`] — direct vendor REST call
//!
//! The absolute-routing rule lives in the registry: a `(vendor, model)`
//! pair binds to exactly one of these.

pub mod cli;
pub mod mcp;
pub mod sdk;

pub use cli::CliTransport;
pub use mcp::McpTransport;
pub use sdk::SdkTransport;
