use thiserror::Error;

/// A structured RFC 6241 `rpc-error` surfaced by the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcError {
    pub message: Option<String>,
    pub tag: Option<String>,
    pub error_type: Option<String>,
    pub severity: Option<String>,
    pub app_tag: Option<String>,
    pub path: Option<String>,
    pub bad_attribute: Option<String>,
    pub bad_element: Option<String>,
    pub bad_namespace: Option<String>,
    pub session_id: Option<String>,
}

/// Errors produced by the NETCONF client capability.
#[derive(Debug, Error)]
pub enum NetconfError {
    /// Establishing the SSH transport failed
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    /// Every authentication method was rejected
    #[error("authentication for {user}@{host} rejected")]
    AuthFailed { user: String, host: String },

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error on the session channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message framing on the device channel was violated
    #[error("device framing error: {0}")]
    Frame(#[from] crate::frame::FrameError),

    /// The peer's hello could not be interpreted
    #[error("invalid hello from peer: {0}")]
    Hello(String),

    /// A reply could not be interpreted
    #[error("malformed reply: {0}")]
    Reply(String),

    /// The peer answered with an rpc-error
    #[error("rpc-error from peer: {}", .0.message.as_deref().unwrap_or("(no message)"))]
    Rpc(RpcError),

    /// The session is no longer usable
    #[error("session is closed")]
    SessionClosed,
}

/// Result type alias for NETCONF client operations.
pub type NetconfResult<T> = Result<T, NetconfError>;

impl NetconfError {
    /// True when the transport itself is damaged and the session must be
    /// discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetconfError::Ssh(_)
                | NetconfError::Io(_)
                | NetconfError::Frame(_)
                | NetconfError::SessionClosed
        )
    }
}
