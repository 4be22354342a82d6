use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RuntimePaths;
use crate::error::VpnResult;
use crate::host::Host;
use crate::poll::{Readiness, RetryPolicy};
use crate::session::SessionState;
use super::registry::Protocol;

/// What a liveness probe saw for one backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    /// PID of the backend daemon, when it has one
    pub pid: Option<u32>,
    /// A backend process (or IPsec SA negotiation) exists
    pub process_running: bool,
    /// The tunnel interface (or IPsec child SA) exists
    pub interface_present: bool,
    pub address: Option<Ipv4Addr>,
    /// Interface present and addressed
    pub ready: bool,
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        self.process_running || self.interface_present
    }

    pub fn state(&self) -> SessionState {
        if self.ready {
            SessionState::Connected
        } else if self.is_live() {
            SessionState::Connecting
        } else {
            SessionState::Disconnected
        }
    }
}

/// Shared by every backend driver
pub struct BackendContext {
    pub host: Arc<dyn Host>,
    pub paths: RuntimePaths,
    /// Budget for waiting on a backend to exit after a stop request
    pub stop_policy: RetryPolicy,
}

/// Common interface that all VPN backend drivers implement
#[async_trait]
pub trait VpnBackend: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Interface name (or IPsec connection name) this backend brings up
    fn interface_name(&self) -> String;

    /// Log file tailed by the status report
    fn log_path(&self) -> PathBuf;

    /// Launch the external connect command; returns the daemon PID if known.
    /// Does not wait for the tunnel.
    async fn connect(&self) -> VpnResult<Option<u32>>;

    /// Single readiness check used by the poller
    async fn probe_ready(&self) -> Option<Readiness>;

    async fn liveness(&self) -> Liveness;

    /// Graceful stop, bounded wait for exit, then artifact removal.
    /// Artifacts are removed even when the stop itself fails.
    async fn disconnect(&self, live: &Liveness) -> VpnResult<()>;
}

/// Factory function type for creating VPN backends
pub type VpnBackendFactory = fn(super::BackendSpec, Arc<BackendContext>) -> Box<dyn VpnBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_states() {
        assert_eq!(Liveness::default().state(), SessionState::Disconnected);
        assert!(!Liveness::default().is_live());

        let starting = Liveness { pid: Some(42), process_running: true, ..Default::default() };
        assert!(starting.is_live());
        assert_eq!(starting.state(), SessionState::Connecting);

        let unaddressed = Liveness { interface_present: true, ..Default::default() };
        assert_eq!(unaddressed.state(), SessionState::Connecting);

        let up = Liveness {
            interface_present: true,
            address: Some(Ipv4Addr::new(10, 0, 0, 2)),
            ready: true,
            ..Default::default()
        };
        assert_eq!(up.state(), SessionState::Connected);
    }
}
