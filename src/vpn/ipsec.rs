//! IPsec/IKEv2 backend driving strongSwan's `ipsec` starter
//!
//! The user's profile is installed into the strongSwan include directory as
//! `vpnctl.conf` (plus `vpnctl.secrets` when a sibling `.secrets` file
//! exists). There is no tunnel interface: readiness is an installed child SA
//! for the profile's first `conn` section.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{VpnError, VpnResult};
use crate::host::Invocation;
use crate::poll::{poll_until, Readiness};
use crate::validation;
use super::backend::{BackendContext, Liveness, VpnBackend};
use super::common;
use super::registry::{BackendSpec, Protocol};

const PROFILE_NAME: &str = "vpnctl";

/// Shown as the interface when the profile names no connection
const FALLBACK_NAME: &str = "ipsec";

/// What `ipsec status <name>` reported for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsecStatus {
    /// IKE SA exists (connecting or established)
    pub negotiating: bool,
    /// Child SA installed in the kernel
    pub installed: bool,
    /// Local side of the first tunnel selector
    pub address: Option<Ipv4Addr>,
}

/// First `conn` section name that is not `%default`
pub fn parse_connection_name(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("conn "))
        .map(str::trim)
        .filter(|name| !name.starts_with('%'))
        .find(|name| validation::validate_connection_name(name).is_ok())
        .map(str::to_string)
}

/// Parse strongSwan status lines such as:
///
/// ```text
/// office[1]: ESTABLISHED 5 seconds ago, 192.168.1.10[client]...203.0.113.1[gw]
/// office{1}:  INSTALLED, TUNNEL, reqid 1, ESP in UDP SPIs: c1a2b3c4_i c4b3a2c1_o
/// office{1}:   10.10.0.5/32 === 0.0.0.0/0
/// ```
pub fn parse_status(name: &str, output: &str) -> IpsecStatus {
    let ike = format!("{}[", name);
    let child = format!("{}{{", name);
    let mut status = IpsecStatus::default();

    for line in output.lines().map(str::trim) {
        if line.starts_with(&ike) {
            status.negotiating = true;
        } else if let Some(rest) = line.strip_prefix(&child) {
            let Some((_, detail)) = rest.split_once(':') else {
                continue;
            };
            let detail = detail.trim();
            if detail.starts_with("INSTALLED") {
                status.installed = true;
            } else if let Some((local, _)) = detail.split_once("===") {
                if status.address.is_none() {
                    status.address = local
                        .split_whitespace()
                        .next()
                        .and_then(|net| net.split('/').next())
                        .and_then(|ip| ip.parse().ok());
                }
            }
        }
    }

    status
}

/// IPsec VPN backend implementation
pub struct IpsecBackend {
    spec: BackendSpec,
    ctx: Arc<BackendContext>,
    conn_name: Option<String>,
}

impl IpsecBackend {
    /// Create a new IPsec backend instance
    pub fn new(spec: BackendSpec, ctx: Arc<BackendContext>) -> Self {
        // The source profile wins; an installed copy covers teardown after
        // the source was moved away
        let installed = ctx.paths.ipsec_dir.join(format!("{}.conf", PROFILE_NAME));
        let conn_name = [spec.config_path.as_path(), installed.as_path()]
            .into_iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .find_map(|content| parse_connection_name(&content));

        Self { spec, ctx, conn_name }
    }

    fn profile_path(&self) -> PathBuf {
        self.ctx.paths.ipsec_dir.join(format!("{}.conf", PROFILE_NAME))
    }

    fn secrets_path(&self) -> PathBuf {
        self.ctx.paths.ipsec_dir.join(format!("{}.secrets", PROFILE_NAME))
    }

    fn source_secrets(&self) -> PathBuf {
        self.spec.config_path.with_extension("secrets")
    }

    async fn query(&self, name: &str) -> IpsecStatus {
        let cmd = Invocation::new("ipsec").args(["status", name]);
        match self.ctx.host.run(&cmd).await {
            // A stopped charon exits non-zero with nothing useful on stdout
            Ok(output) => parse_status(name, &output.stdout),
            Err(e) => {
                debug!("ipsec status failed: {}", e);
                IpsecStatus::default()
            }
        }
    }

    async fn install_profile(&self) -> VpnResult<()> {
        let host = self.ctx.host.as_ref();
        let log = self.log_path();

        common::install_secure_copy(&self.spec.config_path, &self.profile_path(), 0o644).await?;

        let secrets = self.source_secrets();
        if secrets.is_file() {
            common::install_secure_copy(&secrets, &self.secrets_path(), 0o600).await?;
            common::run_logged(host, &Invocation::new("ipsec").arg("rereadsecrets"), &log).await?;
        }

        common::run_logged(host, &Invocation::new("ipsec").arg("reload"), &log).await?;
        Ok(())
    }

    async fn remove_profile(&self) -> VpnResult<()> {
        common::delete_config_file(&self.profile_path()).await?;
        common::delete_config_file(&self.secrets_path()).await?;

        let reload = Invocation::new("ipsec").arg("reload");
        if let Err(e) = common::run_logged(self.ctx.host.as_ref(), &reload, &self.log_path()).await {
            warn!("ipsec reload after profile removal failed: {}", e);
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> VpnResult<()> {
        let host = self.ctx.host.as_ref();
        let down = Invocation::new("ipsec").args(["down", name]);
        if let Err(e) = common::run_logged(host, &down, &self.log_path()).await {
            warn!("ipsec down {} failed: {}", name, e);
        }

        let policy = self.ctx.stop_policy;
        let gone = poll_until(policy, |_| async move {
            let status = self.query(name).await;
            (!status.negotiating && !status.installed).then_some(())
        })
        .await;

        gone.ok_or_else(|| VpnError::StopTimeout {
            protocol: Protocol::Ipsec.display_name().to_string(),
            waited_secs: policy.budget().as_secs(),
        })
    }
}

#[async_trait]
impl VpnBackend for IpsecBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Ipsec
    }

    fn interface_name(&self) -> String {
        self.conn_name.clone().unwrap_or_else(|| FALLBACK_NAME.to_string())
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.paths.log_file(Protocol::Ipsec.id())
    }

    async fn connect(&self) -> VpnResult<Option<u32>> {
        let name = self.conn_name.as_deref().ok_or_else(|| {
            VpnError::ConfigError(format!("No conn section in {}", self.spec.config_path.display()))
        })?;
        info!("Connecting IPsec connection '{}' from {:?}", name, self.spec.config_path);

        common::ensure_directory_exists(&self.ctx.paths.ipsec_dir).await?;
        common::ensure_parent_exists(&self.log_path()).await?;
        self.install_profile().await?;

        // `ipsec up` blocks for the whole IKE exchange
        let up = Invocation::new("ipsec").args(["up", name]);
        let pid = self.ctx.host.spawn_detached(&up, &self.log_path()).await?;
        debug!("ipsec up running as PID {}", pid);

        // charon owns the SA; the helper's PID means nothing once it exits
        Ok(None)
    }

    async fn probe_ready(&self) -> Option<Readiness> {
        let name = self.conn_name.as_deref()?;
        let status = self.query(name).await;
        status.installed.then_some(Readiness { address: status.address })
    }

    async fn liveness(&self) -> Liveness {
        let Some(name) = self.conn_name.as_deref() else {
            return Liveness::default();
        };
        let status = self.query(name).await;
        Liveness {
            pid: None,
            process_running: status.negotiating,
            interface_present: status.installed,
            address: status.address,
            ready: status.installed,
        }
    }

    async fn disconnect(&self, _live: &Liveness) -> VpnResult<()> {
        let stopped = match self.conn_name.as_deref() {
            Some(name) => {
                info!("Disconnecting IPsec connection '{}'", name);
                self.stop(name).await
            }
            None => Ok(()),
        };

        let cleaned = self.remove_profile().await;
        stopped?;
        cleaned?;

        info!("IPsec disconnected");
        Ok(())
    }
}

/// Factory function to create an IPsec backend
pub fn create_backend(spec: BackendSpec, ctx: Arc<BackendContext>) -> Box<dyn VpnBackend> {
    Box::new(IpsecBackend::new(spec, ctx))
}
