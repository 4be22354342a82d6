use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::VpnResult;
use crate::host::Invocation;
use crate::poll::{self, Readiness};
use crate::validation;
use super::backend::{BackendContext, Liveness, VpnBackend};
use super::common;
use super::registry::{BackendSpec, Protocol};

const DEFAULT_INTERFACE: &str = "wg0";

/// WireGuard VPN backend implementation
pub struct WireGuardBackend {
    spec: BackendSpec,
    ctx: Arc<BackendContext>,
    interface: String,
}

impl WireGuardBackend {
    /// Create a new WireGuard backend instance
    pub fn new(spec: BackendSpec, ctx: Arc<BackendContext>) -> Self {
        let interface = interface_from_config(&spec.config_path);
        Self { spec, ctx, interface }
    }

    /// `wg-quick` accepts either a config path or a bare interface name
    fn quick_target(&self) -> String {
        if self.spec.config_path.is_file() {
            self.spec.config_path.to_string_lossy().into_owned()
        } else {
            self.interface.clone()
        }
    }
}

/// wg-quick names the interface after the config file stem
fn interface_from_config(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| validation::validate_interface_name(stem).is_ok())
        .unwrap_or(DEFAULT_INTERFACE)
        .to_string()
}

#[async_trait]
impl VpnBackend for WireGuardBackend {
    fn protocol(&self) -> Protocol {
        Protocol::WireGuard
    }

    fn interface_name(&self) -> String {
        self.interface.clone()
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.paths.log_file(Protocol::WireGuard.id())
    }

    async fn connect(&self) -> VpnResult<Option<u32>> {
        info!("Bringing up WireGuard interface {} from {:?}", self.interface, self.spec.config_path);

        let cmd = Invocation::new("wg-quick").arg("up").path_arg(&self.spec.config_path);
        common::run_logged(self.ctx.host.as_ref(), &cmd, &self.log_path()).await?;

        // Kernel module, no daemon to track
        Ok(None)
    }

    async fn probe_ready(&self) -> Option<Readiness> {
        poll::probe_interface(self.ctx.host.as_ref(), &self.interface).await
    }

    async fn liveness(&self) -> Liveness {
        common::interface_liveness(self.ctx.host.as_ref(), &self.interface, None).await
    }

    async fn disconnect(&self, _live: &Liveness) -> VpnResult<()> {
        info!("Disconnecting WireGuard interface {}", self.interface);
        let host = self.ctx.host.as_ref();

        let cmd = Invocation::new("wg-quick").arg("down").arg(self.quick_target());
        if let Err(e) = common::run_logged(host, &cmd, &self.log_path()).await {
            warn!("wg-quick down failed: {}", e);
            if host.interface_exists(&self.interface).await {
                return Err(e);
            }
            return Ok(());
        }

        common::wait_interface_gone(host, Protocol::WireGuard, &self.interface, self.ctx.stop_policy).await?;
        info!("WireGuard disconnected");
        Ok(())
    }
}

/// Factory function to create a WireGuard backend
pub fn create_backend(spec: BackendSpec, ctx: Arc<BackendContext>) -> Box<dyn VpnBackend> {
    Box::new(WireGuardBackend::new(spec, ctx))
}
