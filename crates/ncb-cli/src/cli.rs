use std::path::PathBuf;

use clap::Parser;
use ncb_types::config::{BrokerConfig, DEFAULT_SOCKET_PATH};

#[derive(Debug, Parser)]
#[command(
    name = "ncb-server",
    about = "NETCONF session broker for short-lived front-end callers"
)]
struct Args {
    /// UNIX socket path front-ends connect to
    #[arg(long, env = "NCB_SOCKET", value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

pub fn parse() -> BrokerConfig {
    let args = Args::parse();
    BrokerConfig {
        socket_path: args.socket,
        ..BrokerConfig::default()
    }
}
