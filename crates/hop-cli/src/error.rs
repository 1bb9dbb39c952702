//! Error types for the hop CLI.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Tunnel(#[from] hop_proxy::TunnelError),

    #[error("Cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
