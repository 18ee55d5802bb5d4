use std::process;
use tracing::{error, info};
use xdagd::{cli, Config, Node};

#[tokio::main]
async fn main() {
    let args = cli::parse_args();
    init_logging(&args.log_level);

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration rejected");
            process::exit(err.exit_code());
        }
    };

    info!(
        network = config.network.name(),
        port = config.port,
        datadir = %config.data_dir.display(),
        "starting xdagd"
    );

    let node = match Node::start(config) {
        Ok(node) => node,
        Err(err) => {
            error!(%err, "startup failed");
            process::exit(err.exit_code());
        }
    };

    let code = node.run().await;
    info!("xdagd stopped");
    process::exit(code);
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(true).init();
}
