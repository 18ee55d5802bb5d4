use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "xdagd")]
#[command(about = "XDAG full node daemon", long_about = None)]
pub struct Args {
    /// Data directory for the block store and node key
    #[arg(long, default_value = "./xdag-data")]
    pub datadir: PathBuf,

    /// Network to join (main, test, dev)
    #[arg(long, default_value = "main")]
    pub network: String,

    /// P2P listen port (defaults to the network's standard port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bootstrap peers, comma-separated host:port
    #[arg(long, value_delimiter = ',')]
    pub bootnodes: Vec<String>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub fn parse_args() -> Args {
    Args::parse()
}
