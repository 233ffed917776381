//! Transmission daemon access
//!
//! - `rpc` - the raw JSON-over-HTTP transport and its wire types
//! - `session` - the adapter the port-sync loop talks to

pub mod rpc;
pub mod session;

pub use rpc::{RpcError, SessionArguments, SessionRpc, SessionStats, TransmissionRpcClient};
pub use session::{Session, TransmissionSession};
