use crate::cli::Args;
use crate::errors::{NodeError, NodeResult};
use crate::sync::SyncConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use xdag_core::Network;
use xdag_network::QueueConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub data_dir: PathBuf,
    pub port: u16,
    pub bootnodes: Vec<SocketAddr>,
    pub max_peers: usize,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Per-network defaults; CLI flags override.
    pub fn for_network(network: Network) -> Self {
        let port = match network {
            Network::Mainnet => 13_392,
            Network::Testnet => 13_393,
            Network::Devnet => 13_394,
        };
        Self {
            network,
            data_dir: PathBuf::from("./xdag-data"),
            port,
            bootnodes: Vec::new(),
            max_peers: 64,
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    pub fn from_args(args: &Args) -> NodeResult<Self> {
        let network = Network::from_name(&args.network)
            .ok_or_else(|| NodeError::Config(format!("unknown network '{}'", args.network)))?;
        let mut config = Config::for_network(network);
        config.data_dir = args.datadir.clone();
        if let Some(port) = args.port {
            config.port = port;
        }
        for node in &args.bootnodes {
            let addr: SocketAddr = node
                .parse()
                .map_err(|_| NodeError::Config(format!("bad bootnode address '{node}'")))?;
            config.bootnodes.push(addr);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_follow_the_network() {
        let args = Args::parse_from(["xdagd", "--network", "dev"]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.network, Network::Devnet);
        assert_eq!(config.port, 13_394);
        assert!(config.bootnodes.is_empty());
    }

    #[test]
    fn cli_overrides_apply() {
        let args = Args::parse_from([
            "xdagd",
            "--network",
            "test",
            "--port",
            "9000",
            "--bootnodes",
            "127.0.0.1:13392,10.0.0.7:13392",
            "--datadir",
            "/tmp/xdag-test",
        ]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.port, 9_000);
        assert_eq!(config.bootnodes.len(), 2);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/xdag-test"));
    }

    #[test]
    fn unknown_network_is_invalid_config() {
        let args = Args::parse_from(["xdagd", "--network", "lunar"]);
        assert!(matches!(
            Config::from_args(&args),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn malformed_bootnode_is_invalid_config() {
        let args = Args::parse_from(["xdagd", "--bootnodes", "not-an-addr"]);
        assert!(matches!(
            Config::from_args(&args),
            Err(NodeError::Config(_))
        ));
    }
}
