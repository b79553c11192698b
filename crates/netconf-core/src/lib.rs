//! NETCONF client core.
//!
//! RFC 6242 message framing, RPC construction, the client capability traits
//! the broker programs against, and the russh-backed transport that drives
//! real device sessions through the `netconf` SSH subsystem.

pub mod client;
pub mod error;
pub mod frame;
pub mod hello;
pub mod rpc;
pub mod ssh;

mod xml;

pub use client::{ConnectParams, NetconfClient, NetconfSession, Notification, RpcReply, SessionStatus};
pub use error::{NetconfError, NetconfResult, RpcError};
pub use hello::{Hello, NetconfVersion};
