//! Peer hello bookkeeping.

use serde::Serialize;

/// Base protocol capability URNs.
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// NETCONF protocol version negotiated during the hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetconfVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl std::fmt::Display for NetconfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NetconfVersion::V1_0 => "1.0",
            NetconfVersion::V1_1 => "1.1",
        })
    }
}

/// Cached description of a NETCONF peer, rebuilt from its hello exchange.
///
/// Serializes to the object the front-end receives from the session-info
/// operations.
#[derive(Debug, Clone, Serialize)]
pub struct Hello {
    #[serde(rename = "sid")]
    pub session_id: String,
    pub version: NetconfVersion,
    pub host: String,
    pub port: String,
    pub user: String,
    pub capabilities: Vec<String>,
}
