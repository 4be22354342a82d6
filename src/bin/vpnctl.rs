//! vpnctl - single-tunnel VPN session manager
//!
//! # Usage
//!
//! ```bash
//! # Connect using VPN_PROTOCOL (default openvpn)
//! sudo vpnctl connect
//!
//! # Connect a specific backend
//! sudo vpnctl connect wireguard
//!
//! # Show what is live, then tear everything down
//! vpnctl status
//! sudo vpnctl disconnect
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use libvpnctl::config::{TimeoutPolicy, VpnctlConfig};
use libvpnctl::error::VpnError;
use libvpnctl::host::SystemHost;
use libvpnctl::vpn::{Protocol, VpnManager};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "vpnctl")]
#[command(version)]
#[command(about = "Connect, disconnect and inspect one VPN tunnel at a time", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $VPNCTL_CONFIG, then /etc/vpnctl/vpnctl.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tear down any live tunnel, then bring up PROTOCOL
    Connect {
        /// openvpn, wireguard, ipsec or pptp (default: $VPN_PROTOCOL, then openvpn)
        protocol: Option<String>,
    },
    /// Stop every live tunnel
    Disconnect,
    /// Show live tunnels and their recent log lines
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = VpnctlConfig::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!("Session record: {:?}", config.paths.session_file());

    if unsafe { libc::geteuid() } != 0 && !matches!(cli.command, Commands::Status { .. }) {
        warn!("Not running as root; backend commands will likely fail");
    }

    let manager = VpnManager::new(&config, Arc::new(SystemHost::new()));

    let code = match cli.command {
        Commands::Connect { protocol } => connect(&manager, protocol.as_deref()).await,
        Commands::Disconnect => {
            let report = manager.disconnect().await;
            println!("{}", report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Status { json } => {
            let report = manager.status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

async fn connect(manager: &VpnManager, protocol: Option<&str>) -> ExitCode {
    let protocol = match protocol.map(str::parse::<Protocol>).transpose() {
        Ok(protocol) => protocol,
        Err(e) => {
            println!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match manager.connect(protocol).await {
        Ok(outcome) => {
            println!("{}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", e);
            if matches!(e, VpnError::ConnectTimeout { .. }) && manager.timeout_policy() == TimeoutPolicy::LeaveRunning {
                println!("The backend was left running. Inspect it with 'vpnctl status' or stop it with 'vpnctl disconnect'.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout carries only the report
fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vpnctl={},libvpnctl={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}
