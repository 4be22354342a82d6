//! vpnctl-dns-hook - OpenVPN `--up`/`--down` script
//!
//! OpenVPN runs this with `script_type` and the pushed `foreign_option_<n>`
//! values in the environment, followed by positional arguments (device, MTU,
//! addresses) that are ignored here.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use libvpnctl::config::VpnctlConfig;
use libvpnctl::dns::{self, DnsConfig, DnsHook, UpOutcome};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Up,
    Down,
}

#[derive(Parser, Debug)]
#[command(name = "vpnctl-dns-hook")]
#[command(version)]
#[command(about = "Apply or restore VPN resolver settings for OpenVPN", long_about = None)]
struct Args {
    /// Transition to run (default: $script_type set by OpenVPN)
    #[arg(long, value_enum)]
    action: Option<Action>,

    /// Configuration file (default: $VPNCTL_CONFIG, then /etc/vpnctl/vpnctl.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    /// Arguments appended by OpenVPN
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    openvpn_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let action = match args.action {
        Some(action) => action,
        None => {
            let script_type = std::env::var("script_type").context("No --action given and script_type is not set")?;
            Action::from_str(&script_type, true)
                .map_err(|_| anyhow::anyhow!("Unsupported script_type '{}'", script_type))?
        }
    };

    let config = VpnctlConfig::discover(args.config.as_deref()).context("Failed to load configuration")?;
    let hook = DnsHook::from_paths(&config.paths);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(async {
        match action {
            Action::Up => {
                let options = dns::foreign_options_from_env(|key| std::env::var(key).ok());
                match hook.up(DnsConfig::from_foreign_options(options)).await? {
                    UpOutcome::Applied { backup_taken } => {
                        info!(
                            "VPN resolver applied to {:?} (backup {:?}, new: {})",
                            hook.resolv_conf(),
                            hook.backup_path(),
                            backup_taken
                        )
                    }
                    UpOutcome::NoVpnDns => info!("No DNS pushed by the server"),
                }
            }
            Action::Down => {
                if !hook.down().await? {
                    info!("Resolver was not modified; nothing to restore");
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vpnctl_dns_hook={},libvpnctl={}", log_level, log_level)));

    // OpenVPN captures script output into its own log
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}
