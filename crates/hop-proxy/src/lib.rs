//! Tunnel engine for the hop two-hop TCP tunnel.
//!
//! `hop-proxy` provides both hops of the tunnel:
//!
//! 1. **CONNECT proxy** (`connect`) - the remote hop. Parses a minimal
//!    `CONNECT host:port` request, dials the destination, replies `200`
//!    or `503`, optionally terminates TLS on the client side, then relays.
//!
//! 2. **Chained forwarder** (`forward`) - the local hop. Dials a fixed
//!    remote proxy for every accepted connection and relays, with no
//!    protocol of its own.
//!
//! Both hops end in the same engine, [`relay::relay`], which services
//! each direction in its own task and closes the pair once both have
//! ended.

pub mod audit;
pub mod config;
pub mod connect;
pub mod dial;
pub mod error;
pub mod forward;
pub mod listener;
pub mod relay;
pub mod server;
pub mod tls;

pub use config::{ForwarderConfig, ProxyConfig, TlsFiles};
pub use connect::{parse_connect_request, Destination};
pub use error::{ParseError, Result, TunnelError};
pub use relay::{relay, RelayReport};
pub use server::{start_forwarder, start_proxy, start_proxy_with_tls, TunnelHandle};
pub use tls::TlsTermination;
