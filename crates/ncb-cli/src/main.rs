//! ncb-server — NETCONF session broker daemon.

mod cli;

use std::sync::Arc;

use netconf_core::ssh::SshNetconfClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = cli::parse();
    let client = Arc::new(SshNetconfClient::new());
    broker_core::daemon::run(client, config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
