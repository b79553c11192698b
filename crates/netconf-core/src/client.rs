//! The client capability the broker programs against.
//!
//! Any conforming transport satisfies these traits; the broker and its tests
//! never assume more than this surface.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;

use crate::error::NetconfResult;
use crate::hello::Hello;
use crate::rpc::Rpc;

/// Transport health as observed after the most recent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Working,
    Broken,
}

/// A successful RPC outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    /// The peer answered `<ok/>`.
    Ok,
    /// The contents of the peer's `<data>` element, or the raw reply body
    /// when the peer returned something other than ok/data/rpc-error.
    Data(String),
}

/// One notification received during history replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub eventtime: i64,
    pub content: String,
}

/// Parameters for opening a session. The password is bound to this call and
/// never stored anywhere else.
#[derive(Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Capabilities to advertise in the client hello; empty means the base
    /// 1.0/1.1 set.
    pub capabilities: Vec<String>,
}

#[async_trait]
pub trait NetconfClient: Send + Sync + 'static {
    type Session: NetconfSession;

    /// Open a NETCONF session towards a device.
    async fn connect(&self, params: ConnectParams) -> NetconfResult<Self::Session>;
}

#[async_trait]
pub trait NetconfSession: Send + 'static {
    /// The peer description captured during the hello exchange.
    fn hello(&self) -> &Hello;

    /// Transport health after the last operation.
    fn status(&self) -> SessionStatus;

    /// Send one RPC and wait for its reply.
    async fn rpc(&mut self, rpc: Rpc) -> NetconfResult<RpcReply>;

    /// Open a further NETCONF session multiplexed over the same transport.
    async fn open_side_channel(&mut self) -> NetconfResult<Self>
    where
        Self: Sized;

    /// Receive replayed notifications into `sink` until the replay ends.
    async fn collect_notifications(&mut self, sink: &mut Vec<Notification>) -> NetconfResult<()>;

    /// Release the session. Further use is an error.
    async fn close(&mut self);
}
