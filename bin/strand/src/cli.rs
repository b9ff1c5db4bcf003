//! Node CLI entry point.

use std::path::PathBuf;

use clap::{Args, Parser};
use eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use strand_engine::Libp2pEngine;
use strand_enode::parse_bootstrap_list;
use strand_identity::load_or_create;
use strand_node::{run_until, shutdown_signal, SessionConfig};

/// Default listen address.
const DEFAULT_LISTEN_ADDR: &str = ":30303";

/// Default node key file path.
const DEFAULT_NODEKEY: &str = "nodekey";

/// strand - minimal devp2p node
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Logging configuration.
    #[command(flatten)]
    pub logs: LogArgs,

    /// Node configuration.
    #[command(flatten)]
    pub node: NodeArgs,
}

/// Node configuration.
#[derive(Debug, Args, Clone)]
#[command(next_help_heading = "Node")]
pub struct NodeArgs {
    /// Listen address for the peer session.
    #[arg(long = "addr", value_name = "HOST:PORT", default_value = DEFAULT_LISTEN_ADDR)]
    pub addr: String,

    /// Node private key file.
    #[arg(long = "nodekey", value_name = "PATH", default_value = DEFAULT_NODEKEY)]
    pub nodekey: PathBuf,

    /// Comma-separated CIDR ranges peer connections are restricted to.
    #[arg(long = "netrestrict", value_name = "CIDRS")]
    pub netrestrict: Option<String>,

    /// Comma-separated bootstrap node enode URLs.
    #[arg(long = "bootnodes", value_name = "URLS")]
    pub bootnodes: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub struct LogArgs {
    /// Silence all output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Log filter directive (e.g., "strand=debug,libp2p=info").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub filter: Option<String>,
}

/// Initialize logging based on command line arguments.
///
/// The filter is built with the following precedence:
/// 1. If `--quiet` is set, only errors are shown
/// 2. Otherwise, start with `RUST_LOG` if set, or default from verbosity
/// 3. Apply any custom directives from `--log.filter`
fn init_logging(args: &LogArgs) {
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else {
        let base_level = match args.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &args.filter {
            for directive in custom.split(',') {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        filter
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parse arguments and run the node to completion.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.logs);

    let identity = load_or_create(&cli.node.nodekey).wrap_err_with(|| {
        format!(
            "failed to initialize node identity from {}",
            cli.node.nodekey.display()
        )
    })?;
    info!(id = %identity.node_id(), "node identity ready");

    let bootnodes = parse_bootstrap_list(cli.node.bootnodes.as_deref().unwrap_or_default());

    let config = SessionConfig::assemble(
        identity,
        cli.node.addr.clone(),
        bootnodes,
        cli.node.netrestrict.clone(),
    );

    run_until(&Libp2pEngine, config, shutdown_signal()).await
}
