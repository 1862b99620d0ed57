//! The host process: one browsing session answering JSON-RPC over stdio, plus
//! the client that drives it from a CLI invocation.

pub mod client;
pub mod protocol;
pub mod server;
pub mod watchdog;

pub use client::HostClient;
pub use protocol::{HostMethod, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{HostServer, ServeEnd};
pub use watchdog::{ExitOutcome, ExitWatchdog};
