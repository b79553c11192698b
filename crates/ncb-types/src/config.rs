use std::path::PathBuf;
use std::time::Duration;

/// Default UNIX socket path the daemon listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mod_netconf.sock";

/// Runtime configuration for the broker daemon.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Path of the listening UNIX socket. A stale file is removed on startup.
    pub socket_path: PathBuf,
    /// Listen backlog of the UNIX socket.
    pub backlog: u32,
    /// Sessions idle longer than this are closed by the reaper.
    pub idle_timeout: Duration,
    /// How often the idle reaper runs.
    pub reap_interval: Duration,
    /// How long shutdown waits for each worker before giving up on it.
    pub shutdown_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            backlog: 10,
            idle_timeout: Duration::from_secs(60 * 60),
            reap_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
