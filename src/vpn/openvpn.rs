use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dns::DnsHook;
use crate::error::VpnResult;
use crate::host::Invocation;
use crate::poll::{self, Readiness};
use super::backend::{BackendContext, Liveness, VpnBackend};
use super::common;
use super::registry::{BackendSpec, Protocol};

/// OpenVPN always gets this device so readiness has a fixed target
pub const OPENVPN_INTERFACE: &str = "tun0";

const OPENVPN_BINARY: &str = "openvpn";

/// OpenVPN backend implementation
pub struct OpenVpnBackend {
    spec: BackendSpec,
    ctx: Arc<BackendContext>,
}

impl OpenVpnBackend {
    /// Create a new OpenVPN backend instance
    pub fn new(spec: BackendSpec, ctx: Arc<BackendContext>) -> Self {
        Self { spec, ctx }
    }

    fn pid_file(&self) -> PathBuf {
        self.ctx.paths.openvpn_pid_file()
    }

    /// Build OpenVPN command arguments
    fn build_command(&self, with_auth: bool, with_dns_hook: bool) -> Invocation {
        let paths = &self.ctx.paths;
        // Options after --config override the file, so the device name is fixed
        let mut cmd = Invocation::new(OPENVPN_BINARY)
            .arg("--config")
            .path_arg(&self.spec.config_path)
            .args(["--dev", OPENVPN_INTERFACE])
            .args(["--daemon", "vpnctl-openvpn"])
            .arg("--writepid")
            .path_arg(&self.pid_file())
            .arg("--log")
            .path_arg(&self.log_path());

        if with_auth {
            cmd = cmd.arg("--auth-user-pass").path_arg(&paths.auth_temp);
        }

        if with_dns_hook {
            cmd = cmd
                .args(["--script-security", "2"])
                .arg("--up")
                .path_arg(&paths.dns_hook)
                .arg("--down")
                .path_arg(&paths.dns_hook)
                .arg("--down-pre");
            // The hook must read the same config vpnctl was started with
            if let Some(source) = &paths.source {
                cmd = cmd.args(["--setenv", "VPNCTL_CONFIG"]).path_arg(source);
            }
        }

        cmd
    }

    /// PID from the pid file if that process still exists, else by name
    async fn find_pid(&self) -> Option<u32> {
        let host = self.ctx.host.as_ref();
        if let Some(pid) = common::read_pid_file(&self.pid_file()).await {
            if host.process_alive(pid).await {
                return Some(pid);
            }
            debug!("Stale OpenVPN pid file (PID: {})", pid);
        }
        host.find_process(OPENVPN_BINARY).await
    }

    async fn remove_artifacts(&self) -> VpnResult<()> {
        common::delete_config_file(&self.ctx.paths.auth_temp).await?;
        common::delete_config_file(&self.pid_file()).await?;
        // The --down script normally restored the resolver already
        if DnsHook::from_paths(&self.ctx.paths).down().await? {
            info!("Restored resolver left behind by OpenVPN");
        }
        Ok(())
    }
}

#[async_trait]
impl VpnBackend for OpenVpnBackend {
    fn protocol(&self) -> Protocol {
        Protocol::OpenVpn
    }

    fn interface_name(&self) -> String {
        OPENVPN_INTERFACE.to_string()
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.paths.log_file(Protocol::OpenVpn.id())
    }

    async fn connect(&self) -> VpnResult<Option<u32>> {
        info!("Connecting OpenVPN: {:?}", self.spec.config_path);
        let paths = &self.ctx.paths;
        common::ensure_directory_exists(&paths.state_dir).await?;
        common::ensure_parent_exists(&self.log_path()).await?;

        // Credentials are optional; the config may not ask for them
        let with_auth = match &self.spec.auth_path {
            Some(auth) if auth.is_file() => {
                common::install_private_copy(auth, &paths.auth_temp, 0o600).await?;
                true
            }
            _ => false,
        };

        let with_dns_hook = paths.dns_hook.is_file();
        if !with_dns_hook {
            warn!("DNS hook {:?} not found; resolver will not be managed", paths.dns_hook);
        }

        let cmd = self.build_command(with_auth, with_dns_hook);
        // --daemon: returns once OpenVPN has forked
        common::run_logged(self.ctx.host.as_ref(), &cmd, &self.log_path()).await?;

        let pid = self.find_pid().await;
        info!("OpenVPN started (PID: {:?}, interface: {})", pid, OPENVPN_INTERFACE);
        Ok(pid)
    }

    async fn probe_ready(&self) -> Option<Readiness> {
        poll::probe_interface(self.ctx.host.as_ref(), OPENVPN_INTERFACE).await
    }

    async fn liveness(&self) -> Liveness {
        let pid = self.find_pid().await;
        common::interface_liveness(self.ctx.host.as_ref(), OPENVPN_INTERFACE, pid).await
    }

    async fn disconnect(&self, live: &Liveness) -> VpnResult<()> {
        info!("Disconnecting OpenVPN");
        let stopped = match live.pid {
            Some(pid) => common::terminate_process(self.ctx.host.as_ref(), Protocol::OpenVpn, pid, self.ctx.stop_policy).await,
            None => {
                warn!("{} present without an OpenVPN process", OPENVPN_INTERFACE);
                Ok(())
            }
        };

        let cleaned = self.remove_artifacts().await;
        stopped?;
        cleaned?;

        info!("OpenVPN disconnected");
        Ok(())
    }
}

/// Factory function to create an OpenVPN backend
pub fn create_backend(spec: BackendSpec, ctx: Arc<BackendContext>) -> Box<dyn VpnBackend> {
    Box::new(OpenVpnBackend::new(spec, ctx))
}
