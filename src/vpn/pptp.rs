use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::VpnResult;
use crate::host::Invocation;
use crate::poll::{self, Readiness};
use super::backend::{BackendContext, Liveness, VpnBackend};
use super::common;
use super::registry::{BackendSpec, Protocol};

/// `unit 0` pins the ppp device name
pub const PPTP_INTERFACE: &str = "ppp0";

const PPPD_BINARY: &str = "pppd";

/// PPTP backend: `pppd` with a peers file that loads the pptp plugin
pub struct PptpBackend {
    spec: BackendSpec,
    ctx: Arc<BackendContext>,
}

impl PptpBackend {
    pub fn new(spec: BackendSpec, ctx: Arc<BackendContext>) -> Self {
        Self { spec, ctx }
    }

    fn build_command(&self) -> Invocation {
        Invocation::new(PPPD_BINARY)
            .arg("file")
            .path_arg(&self.spec.config_path)
            .args(["unit", "0"])
            .arg("logfile")
            .path_arg(&self.log_path())
    }
}

#[async_trait]
impl VpnBackend for PptpBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Pptp
    }

    fn interface_name(&self) -> String {
        PPTP_INTERFACE.to_string()
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.paths.log_file(Protocol::Pptp.id())
    }

    async fn connect(&self) -> VpnResult<Option<u32>> {
        info!("Connecting PPTP using {:?}", self.spec.config_path);
        common::ensure_parent_exists(&self.log_path()).await?;

        // pppd detaches on its own once the peers file has been read
        common::run_logged(self.ctx.host.as_ref(), &self.build_command(), &self.log_path()).await?;

        Ok(self.ctx.host.find_process(PPPD_BINARY).await)
    }

    async fn probe_ready(&self) -> Option<Readiness> {
        poll::probe_interface(self.ctx.host.as_ref(), PPTP_INTERFACE).await
    }

    async fn liveness(&self) -> Liveness {
        let host = self.ctx.host.as_ref();
        let pid = host.find_process(PPPD_BINARY).await;
        common::interface_liveness(host, PPTP_INTERFACE, pid).await
    }

    async fn disconnect(&self, live: &Liveness) -> VpnResult<()> {
        let Some(pid) = live.pid else {
            warn!("{} present without a pppd process", PPTP_INTERFACE);
            return Ok(());
        };

        common::terminate_process(self.ctx.host.as_ref(), Protocol::Pptp, pid, self.ctx.stop_policy).await?;
        info!("PPTP disconnected");
        Ok(())
    }
}

pub fn create_backend(spec: BackendSpec, ctx: Arc<BackendContext>) -> Box<dyn VpnBackend> {
    Box::new(PptpBackend::new(spec, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VpnctlConfig;
    use crate::host::{CommandOutput, MockHost, Signal};
    use crate::poll::RetryPolicy;
    use std::time::Duration;

    fn backend(root: &std::path::Path, host: MockHost) -> PptpBackend {
        let config = VpnctlConfig::rooted_at(root);
        let spec = BackendSpec {
            protocol: Protocol::Pptp,
            config_path: config.backends.pptp.clone(),
            auth_path: None,
            ready_attempts: 15,
        };
        let ctx = Arc::new(BackendContext {
            host: Arc::new(host),
            paths: config.paths,
            stop_policy: RetryPolicy::new(Duration::ZERO, 3),
        });
        PptpBackend::new(spec, ctx)
    }

    #[tokio::test]
    async fn test_connect_reports_pppd_pid() {
        let dir = tempfile::tempdir().unwrap();
        let expected = format!(
            "pppd file {root}/pptp unit 0 logfile {root}/log/pptp.log",
            root = dir.path().display()
        );

        let mut host = MockHost::new();
        host.expect_run()
            .withf(move |cmd| cmd.to_string() == expected)
            .times(1)
            .returning(|_| Ok(CommandOutput { code: Some(0), ..Default::default() }));
        host.expect_find_process().withf(|name| name == "pppd").returning(|_| Some(812));

        let backend = backend(dir.path(), host);
        assert_eq!(backend.connect().await.unwrap(), Some(812));
    }

    #[tokio::test]
    async fn test_disconnect_terminates_pppd() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = MockHost::new();
        host.expect_signal()
            .withf(|pid, sig| *pid == 812 && *sig == Signal::Term)
            .times(1)
            .returning(|_, _| Ok(()));
        host.expect_process_alive().returning(|_| false);

        let backend = backend(dir.path(), host);
        let live = Liveness { pid: Some(812), process_running: true, ..Default::default() };
        backend.disconnect(&live).await.unwrap();
    }
}
