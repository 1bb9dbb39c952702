//! CLI argument definitions for hop
//!
//! Uses clap for argument parsing. Every flag is optional on top of an
//! optional JSON config file; flags win.

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// hop - a two-hop TCP tunnel
///
/// Run `hop forward` next to your clients and `hop proxy` on the far
/// side. The forwarder relays raw bytes to the proxy, which speaks a
/// minimal HTTP CONNECT dialect and opens the requested destination.
#[derive(Parser, Debug)]
#[command(name = "hop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silent mode - suppress the startup banner
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the CONNECT proxy hop
    #[command(after_help = "EXAMPLES:
    # Listen on the default 0.0.0.0:8888
    hop proxy

    # Custom port, terminate TLS toward clients
    hop proxy --port 19483 --cert server.pem --key server.key

    # Settings from a JSON file, port overridden on the command line
    hop proxy --config proxy.json --port 9000
")]
    Proxy(ProxyArgs),

    /// Run the chained forwarder hop
    #[command(after_help = "EXAMPLES:
    # Relay 0.0.0.0:19484 to a remote proxy on its default port 19483
    hop forward --remote-host 203.0.113.10

    # Everything explicit
    hop forward --local-host 127.0.0.1 --local-port 9999 \\
        --remote-host proxy.example.net --remote-port 8888
")]
    Forward(ForwardArgs),
}

/// Settings shared by both hops.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON config file; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds a tunnel direction may stay silent before closing
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Seconds allowed for each outbound connect
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    /// Host IP to bind the proxy server (default: 0.0.0.0)
    #[arg(long, short = 'H', value_name = "IP")]
    pub host: Option<IpAddr>,

    /// Port number to listen on (default: 8888)
    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// PEM certificate chain for TLS termination (needs --key too)
    #[arg(long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// PEM private key for TLS termination (needs --cert too)
    #[arg(long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ForwardArgs {
    /// Local host to bind (default: 0.0.0.0)
    #[arg(long = "local-host", value_name = "IP")]
    pub local_host: Option<IpAddr>,

    /// Local port to listen on (default: 19484)
    #[arg(long = "local-port", value_name = "PORT")]
    pub local_port: Option<u16>,

    /// Remote proxy server host (required here or in --config)
    #[arg(long = "remote-host", value_name = "HOST")]
    pub remote_host: Option<String>,

    /// Remote proxy server port (default: 19483)
    #[arg(long = "remote-port", value_name = "PORT")]
    pub remote_port: Option<u16>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_proxy_flags() {
        let cli = Cli::try_parse_from(["hop", "proxy", "-H", "127.0.0.1", "-p", "9000"]).unwrap();
        match cli.command {
            Commands::Proxy(args) => {
                assert_eq!(args.host, Some("127.0.0.1".parse().unwrap()));
                assert_eq!(args.port, Some(9000));
                assert!(args.cert.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cert_and_key_parse_independently() {
        assert!(Cli::try_parse_from(["hop", "proxy", "--cert", "c.pem"]).is_ok());
        assert!(Cli::try_parse_from(["hop", "proxy", "--key", "k.pem"]).is_ok());
        assert!(
            Cli::try_parse_from(["hop", "proxy", "--cert", "c.pem", "--key", "k.pem"]).is_ok()
        );
    }

    #[test]
    fn test_forward_flags() {
        let cli = Cli::try_parse_from([
            "hop",
            "-v",
            "forward",
            "--remote-host",
            "10.0.0.2",
            "--remote-port",
            "8888",
            "--idle-timeout",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Forward(args) => {
                assert_eq!(args.remote_host.as_deref(), Some("10.0.0.2"));
                assert_eq!(args.remote_port, Some(8888));
                assert_eq!(args.common.idle_timeout, Some(30));
                assert!(args.local_port.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
