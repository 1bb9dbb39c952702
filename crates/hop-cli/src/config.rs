//! Configuration assembly for the hop CLI
//!
//! Builds the library configs from two sources, in precedence order:
//! - CLI flags (highest)
//! - An optional JSON config file (`--config`)
//! - Library defaults

use crate::cli::{CommonArgs, ForwardArgs, ProxyArgs};
use crate::error::{CliError, Result};
use hop_proxy::{ForwarderConfig, ProxyConfig, TlsFiles};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::warn;

/// Build the CONNECT proxy config.
pub fn proxy_config(args: &ProxyArgs) -> Result<ProxyConfig> {
    let mut config: ProxyConfig = load_or_default(args.common.config.as_deref())?;

    if let Some(host) = args.host {
        config.bind_addr = host;
    }
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    match (&args.cert, &args.key) {
        (Some(cert_path), Some(key_path)) => {
            config.tls = Some(TlsFiles {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            });
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("TLS termination needs both --cert and --key; running without TLS");
            config.tls = None;
        }
        (None, None) => {}
    }
    apply_common(
        &args.common,
        &mut config.idle_timeout_secs,
        &mut config.connect_timeout_secs,
        &mut config.max_connections,
    );

    check_timeouts(config.idle_timeout_secs, config.connect_timeout_secs)?;
    Ok(config)
}

/// Build the forwarder config. A remote host is mandatory.
pub fn forwarder_config(args: &ForwardArgs) -> Result<ForwarderConfig> {
    let mut config: ForwarderConfig = load_or_default(args.common.config.as_deref())?;

    if let Some(host) = args.local_host {
        config.bind_addr = host;
    }
    if let Some(port) = args.local_port {
        config.bind_port = port;
    }
    if let Some(ref remote_host) = args.remote_host {
        config.remote_host = remote_host.clone();
    }
    if let Some(port) = args.remote_port {
        config.remote_port = port;
    }
    apply_common(
        &args.common,
        &mut config.idle_timeout_secs,
        &mut config.connect_timeout_secs,
        &mut config.max_connections,
    );

    if config.remote_host.trim().is_empty() {
        return Err(CliError::Config(
            "a remote proxy host is required (--remote-host or \"remote_host\" in --config)"
                .to_string(),
        ));
    }
    check_timeouts(config.idle_timeout_secs, config.connect_timeout_secs)?;
    Ok(config)
}

fn apply_common(
    common: &CommonArgs,
    idle_timeout_secs: &mut u64,
    connect_timeout_secs: &mut u64,
    max_connections: &mut usize,
) {
    if let Some(secs) = common.idle_timeout {
        *idle_timeout_secs = secs;
    }
    if let Some(secs) = common.connect_timeout {
        *connect_timeout_secs = secs;
    }
    if let Some(max) = common.max_connections {
        *max_connections = max;
    }
}

// A zero timeout expires on its first poll: every direction would end
// before its first read, every dial before it connects.
fn check_timeouts(idle_secs: u64, connect_secs: u64) -> Result<()> {
    if idle_secs == 0 {
        return Err(CliError::Config(
            "idle timeout must be at least 1 second".to_string(),
        ));
    }
    if connect_secs == 0 {
        return Err(CliError::Config(
            "connect timeout must be at least 1 second".to_string(),
        ));
    }
    Ok(())
}

fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let content = std::fs::read_to_string(path).map_err(|e| CliError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| CliError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::io::Write;

    fn proxy_args(argv: &[&str]) -> ProxyArgs {
        let mut full = vec!["hop", "proxy"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Proxy(args) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    fn forward_args(argv: &[&str]) -> ForwardArgs {
        let mut full = vec!["hop", "forward"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Forward(args) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_proxy_defaults() {
        let config = proxy_config(&proxy_args(&[])).unwrap();
        assert_eq!(config.bind_port, 8888);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0");
        assert_eq!(config.idle_timeout_secs, 5);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_proxy_tls_flags() {
        let config =
            proxy_config(&proxy_args(&["--cert", "/etc/c.pem", "--key", "/etc/k.pem"])).unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path.to_str(), Some("/etc/c.pem"));
        assert_eq!(tls.key_path.to_str(), Some("/etc/k.pem"));
    }

    #[test]
    fn test_partial_tls_flags_disable_termination() {
        let config = proxy_config(&proxy_args(&["--cert", "/etc/c.pem"])).unwrap();
        assert!(config.tls.is_none());
        let config = proxy_config(&proxy_args(&["--key", "/etc/k.pem"])).unwrap();
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bind_port": 7000, "idle_timeout_secs": 20, "max_connections": 64}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = proxy_args(&["--config", path.as_str(), "--idle-timeout", "9"]);
        let config = proxy_config(&args).unwrap();
        assert_eq!(config.bind_port, 7000);
        assert_eq!(config.idle_timeout_secs, 9);
        assert_eq!(config.max_connections, 64);
    }

    #[test]
    fn test_forwarder_requires_remote_host() {
        assert!(matches!(
            forwarder_config(&forward_args(&[])),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_forwarder_defaults_with_remote() {
        let config = forwarder_config(&forward_args(&["--remote-host", "10.9.8.7"])).unwrap();
        assert_eq!(config.bind_port, 19484);
        assert_eq!(config.remote_port, 19483);
        assert_eq!(config.remote_host, "10.9.8.7");
    }

    #[test]
    fn test_forwarder_remote_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"remote_host": "proxy.internal", "remote_port": 8888}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = forwarder_config(&forward_args(&["--config", path.as_str()])).unwrap();
        assert_eq!(config.remote_host, "proxy.internal");
        assert_eq!(config.remote_port, 8888);
    }

    #[test]
    fn test_bad_config_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        match proxy_config(&proxy_args(&["--config", path.as_str()])) {
            Err(CliError::ConfigParse { path: reported, .. }) => {
                assert_eq!(reported, file.path())
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        assert!(proxy_config(&proxy_args(&["--idle-timeout", "0"])).is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        assert!(matches!(
            proxy_config(&proxy_args(&["--connect-timeout", "0"])),
            Err(CliError::Config(_))
        ));
        let args = forward_args(&["--remote-host", "10.0.0.2", "--connect-timeout", "0"]);
        assert!(matches!(forwarder_config(&args), Err(CliError::Config(_))));
    }
}
