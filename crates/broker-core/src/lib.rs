//! Session broker core.
//!
//! The registry of live NETCONF sessions, the JSON operation dispatcher, the
//! per-connection request/reply loop, and the daemon supervisor that ties
//! them to a UNIX socket.

pub mod connection;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod registry;

pub use error::{BrokerError, BrokerResult};
