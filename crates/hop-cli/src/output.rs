//! CLI output styling for hop

use colored::Colorize;
use hop_proxy::{ForwarderConfig, ProxyConfig};
use std::net::SocketAddr;

/// Print the startup banner for the CONNECT hop.
pub fn print_proxy_banner(silent: bool, local_addr: SocketAddr, config: &ProxyConfig) {
    if silent {
        return;
    }
    print_title("proxy");
    eprintln!("  {} {}", "listening".bold(), local_addr.to_string().green());
    let tls = match config.tls {
        Some(ref files) => format!("terminating with {}", files.cert_path.display()).yellow(),
        None => "off (bytes pass through)".dimmed(),
    };
    eprintln!("  {} {}", "tls      ".bold(), tls);
    print_timeouts(config.idle_timeout_secs, config.connect_timeout_secs);
}

/// Print the startup banner for the forwarder hop.
pub fn print_forward_banner(silent: bool, local_addr: SocketAddr, config: &ForwarderConfig) {
    if silent {
        return;
    }
    print_title("forward");
    eprintln!("  {} {}", "listening".bold(), local_addr.to_string().green());
    eprintln!(
        "  {} {}:{}",
        "remote   ".bold(),
        config.remote_host.cyan(),
        config.remote_port.to_string().cyan()
    );
    print_timeouts(config.idle_timeout_secs, config.connect_timeout_secs);
}

fn print_title(mode: &str) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!();
    eprintln!(
        " {} {} {}",
        "hop".truecolor(204, 102, 0).bold(),
        mode.bold(),
        format!("v{}", version).white()
    );
}

fn print_timeouts(idle_secs: u64, connect_secs: u64) {
    eprintln!(
        "  {} idle {}s, connect {}s",
        "timeouts ".bold(),
        idle_secs,
        connect_secs
    );
    eprintln!("  {}", "Ctrl-C to stop".dimmed());
    eprintln!();
}
