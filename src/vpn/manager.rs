use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{TimeoutPolicy, TimeoutSettings, VpnctlConfig};
use crate::error::{VpnError, VpnResult};
use crate::host::Host;
use crate::poll::{self, RetryPolicy};
use crate::session::{SessionState, SessionStore, VpnSession};
use super::backend::{BackendContext, VpnBackend, VpnBackendFactory};
use super::common;
use super::registry::{BackendSpec, Protocol, Registry};
use super::status::{BackendStatus, StatusReport, STATUS_LOG_LINES};
use super::{ipsec, openvpn, pptp, wireguard};

/// Result of a successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub protocol: Protocol,
    pub interface: String,
    pub address: Option<Ipv4Addr>,
    pub pid: Option<u32>,
}

impl fmt::Display for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connected: {} on {}", self.protocol, self.interface)?;
        if let Some(addr) = self.address {
            write!(f, " ({})", addr)?;
        }
        Ok(())
    }
}

/// Per-backend results of a disconnect pass; only live backends appear
#[derive(Debug, Default)]
pub struct DisconnectReport {
    pub results: Vec<(Protocol, VpnResult<()>)>,
}

impl DisconnectReport {
    /// Nothing was live
    pub fn is_noop(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn stopped(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.results.iter().filter(|(_, r)| r.is_ok()).map(|(p, _)| *p)
    }

    pub fn failures(&self) -> impl Iterator<Item = (Protocol, &VpnError)> + '_ {
        self.results
            .iter()
            .filter_map(|(p, r)| r.as_ref().err().map(|e| (*p, e)))
    }
}

impl fmt::Display for DisconnectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "No VPN is running.");
        }
        let lines: Vec<String> = self
            .results
            .iter()
            .map(|(protocol, result)| match result {
                Ok(()) => format!("Disconnected: {}", protocol),
                Err(e) => format!("Failed to stop {}: {}", protocol, e),
            })
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// Session controller: the only place backends are started or stopped.
///
/// Connect and Disconnect hold the session lock for their whole duration, so
/// callers sharing a manager are serialized and never race on the default
/// route or the resolver file.
pub struct VpnManager {
    ctx: Arc<BackendContext>,
    registry: Registry,
    timeouts: TimeoutSettings,
    /// Registered backend factories
    backends: HashMap<Protocol, VpnBackendFactory>,
    session: Mutex<SessionStore>,
}

impl VpnManager {
    /// Manager with all four backends registered, reading overrides from the
    /// process environment
    pub fn new(config: &VpnctlConfig, host: Arc<dyn Host>) -> Self {
        Self::with_registry(config, host, Registry::new(config))
    }

    pub fn with_registry(config: &VpnctlConfig, host: Arc<dyn Host>, registry: Registry) -> Self {
        let timeouts = config.timeouts.clone();
        let ctx = Arc::new(BackendContext {
            host,
            paths: config.paths.clone(),
            stop_policy: RetryPolicy::new(timeouts.interval(), timeouts.stop_attempts),
        });

        let mut manager = Self {
            ctx,
            registry,
            timeouts,
            backends: HashMap::new(),
            session: Mutex::new(SessionStore::new(config.paths.session_file())),
        };
        manager.register_backend(Protocol::OpenVpn, openvpn::create_backend);
        manager.register_backend(Protocol::WireGuard, wireguard::create_backend);
        manager.register_backend(Protocol::Ipsec, ipsec::create_backend);
        manager.register_backend(Protocol::Pptp, pptp::create_backend);
        manager
    }

    /// Register (or replace) the driver for a protocol
    pub fn register_backend(&mut self, protocol: Protocol, factory: VpnBackendFactory) {
        debug!("Registering VPN backend: {}", protocol);
        self.backends.insert(protocol, factory);
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeouts.on_timeout
    }

    fn build(&self, spec: BackendSpec) -> Option<Box<dyn VpnBackend>> {
        let factory = self.backends.get(&spec.protocol)?;
        Some(factory(spec, self.ctx.clone()))
    }

    /// Tear down whatever is live, then bring up `protocol` (or the
    /// environment's choice) and wait for it to become ready.
    pub async fn connect(&self, protocol: Option<Protocol>) -> VpnResult<ConnectOutcome> {
        let store = self.session.lock().await;
        let protocol = self.registry.select(protocol)?;
        info!("Connecting {}", protocol);

        let report = self.disconnect_all().await;
        for (other, e) in report.failures() {
            warn!("Could not stop {} before connecting: {}", other, e);
        }
        common::delete_config_file(&self.ctx.paths.auth_temp).await?;

        let spec = self.registry.resolve(protocol)?;
        let attempts = spec.ready_attempts;
        let backend = self.build(spec).ok_or_else(|| {
            VpnError::InvalidParameter(format!("No backend registered for {}", protocol))
        })?;

        let mut session = VpnSession::new(protocol, backend.interface_name());
        store.save(&session).await?;

        match backend.connect().await {
            Ok(pid) => session.pid = pid,
            Err(e) => {
                session.state = SessionState::Failed(e.to_string());
                if let Err(save_err) = store.save(&session).await {
                    warn!("Could not record failed session: {}", save_err);
                }
                return Err(e);
            }
        }
        store.save(&session).await?;

        let policy = RetryPolicy::new(self.timeouts.interval(), attempts);
        match poll::wait_until_ready(policy, &session.interface, || backend.probe_ready()).await {
            Ok(ready) => {
                session.address = ready.address;
                session.state = SessionState::Connected;
                store.save(&session).await?;
                info!("{} connected on {} ({:?})", protocol, session.interface, session.address);
                Ok(ConnectOutcome {
                    protocol,
                    interface: session.interface,
                    address: session.address,
                    pid: session.pid,
                })
            }
            Err(e) => {
                warn!("{}: {}", protocol, e);
                match self.timeouts.on_timeout {
                    TimeoutPolicy::TearDown => {
                        let live = backend.liveness().await;
                        if let Err(stop_err) = backend.disconnect(&live).await {
                            warn!("Teardown of {} after timeout failed: {}", protocol, stop_err);
                        }
                        store.clear().await?;
                    }
                    TimeoutPolicy::LeaveRunning => {
                        session.state = SessionState::Failed(e.to_string());
                        store.save(&session).await?;
                    }
                }
                Err(e)
            }
        }
    }

    /// Stop every live backend. Never fails as a whole; inspect the report.
    pub async fn disconnect(&self) -> DisconnectReport {
        let store = self.session.lock().await;
        if let Some(mut record) = store.load().await {
            record.state = SessionState::Disconnecting;
            if let Err(e) = store.save(&record).await {
                warn!("Could not update session record: {}", e);
            }
        }
        let report = self.disconnect_all().await;

        if report.is_noop() {
            info!("No VPN is running");
        }
        if let Err(e) = store.clear().await {
            warn!("Could not clear session record: {}", e);
        }
        report
    }

    /// Caller holds the session lock
    async fn disconnect_all(&self) -> DisconnectReport {
        let mut report = DisconnectReport::default();

        for protocol in Protocol::ALL {
            let Some(backend) = self.build(self.registry.spec(protocol)) else {
                continue;
            };
            let live = backend.liveness().await;
            if !live.is_live() {
                debug!("{} not running", protocol);
                continue;
            }

            let protocol = backend.protocol();
            info!("Stopping {} ({})", protocol, backend.interface_name());
            let result = backend.disconnect(&live).await;
            if let Err(e) = &result {
                warn!("Failed to stop {}: {}", protocol, e);
            }
            report.results.push((protocol, result));
        }

        report
    }

    /// Probe every backend independently. Read-only: a stale session record
    /// is ignored, not cleared.
    pub async fn status(&self) -> StatusReport {
        let store = self.session.lock().await;
        let record = store.load().await;
        let mut report = StatusReport::default();

        for protocol in Protocol::ALL {
            let Some(backend) = self.build(self.registry.spec(protocol)) else {
                continue;
            };
            let live = backend.liveness().await;
            if !live.is_live() {
                continue;
            }

            let started_at = record
                .as_ref()
                .filter(|s| s.protocol == protocol)
                .map(|s| s.started_at);

            report.backends.push(BackendStatus {
                protocol: backend.protocol(),
                state: live.state(),
                interface: backend.interface_name(),
                pid: live.pid,
                address: live.address,
                started_at,
                log_tail: common::tail_lines(&backend.log_path(), STATUS_LOG_LINES).await,
            });
        }

        if report.backends.len() > 1 {
            let names: Vec<&str> = report.backends.iter().map(|b| b.protocol.display_name()).collect();
            warn!("More than one VPN backend is live: {}", names.join(", "));
        }
        if let Some(stale) = record.filter(|s| s.state.is_active() && report.get(s.protocol).is_none()) {
            debug!("Ignoring stale session record for {} ({})", stale.protocol, stale.state);
        }

        report
    }
}
