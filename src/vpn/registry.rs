//! Protocol registry
//!
//! Maps a protocol identifier to its backend config file. Resolution is pure:
//! it reads the environment and checks that the file exists, nothing more.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{BackendPaths, TimeoutSettings, VpnctlConfig};
use crate::error::{VpnError, VpnResult};

/// Backend selector when no protocol is given explicitly
pub const PROTOCOL_ENV: &str = "VPN_PROTOCOL";

/// Credentials file handed to OpenVPN via a transient copy
pub const OPENVPN_AUTH_ENV: &str = "OPENVPN_AUTH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    OpenVpn,
    WireGuard,
    Ipsec,
    Pptp,
}

impl Protocol {
    /// Every backend, in teardown and report order
    pub const ALL: [Protocol; 4] = [Protocol::OpenVpn, Protocol::WireGuard, Protocol::Ipsec, Protocol::Pptp];

    /// Lowercase identifier used on the command line and in file names
    pub fn id(&self) -> &'static str {
        match self {
            Protocol::OpenVpn => "openvpn",
            Protocol::WireGuard => "wireguard",
            Protocol::Ipsec => "ipsec",
            Protocol::Pptp => "pptp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Protocol::OpenVpn => "OpenVPN",
            Protocol::WireGuard => "WireGuard",
            Protocol::Ipsec => "IPsec",
            Protocol::Pptp => "PPTP",
        }
    }

    /// Environment variable overriding the config path
    pub fn config_env(&self) -> &'static str {
        match self {
            Protocol::OpenVpn => "OPENVPN_CONFIG",
            Protocol::WireGuard => "WIREGUARD_CONFIG",
            Protocol::Ipsec => "IPSEC_CONFIG",
            Protocol::Pptp => "PPTP_CONFIG",
        }
    }

    /// Readiness probes allowed after launch
    pub fn ready_attempts(&self, timeouts: &TimeoutSettings) -> u32 {
        match self {
            Protocol::OpenVpn => timeouts.openvpn_attempts,
            Protocol::WireGuard => timeouts.wireguard_attempts,
            Protocol::Ipsec => timeouts.ipsec_attempts,
            Protocol::Pptp => timeouts.pptp_attempts,
        }
    }

    fn default_config<'a>(&self, backends: &'a BackendPaths) -> &'a Path {
        match self {
            Protocol::OpenVpn => backends.openvpn.as_path(),
            Protocol::WireGuard => backends.wireguard.as_path(),
            Protocol::Ipsec => backends.ipsec.as_path(),
            Protocol::Pptp => backends.pptp.as_path(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Protocol {
    type Err = VpnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openvpn" | "ovpn" => Ok(Protocol::OpenVpn),
            "wireguard" | "wg" => Ok(Protocol::WireGuard),
            "ipsec" | "ikev2" | "strongswan" => Ok(Protocol::Ipsec),
            "pptp" => Ok(Protocol::Pptp),
            other => Err(VpnError::InvalidParameter(format!(
                "Unknown VPN protocol '{}' (expected openvpn, wireguard, ipsec or pptp)",
                other
            ))),
        }
    }
}

/// Everything needed to build a backend driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub protocol: Protocol,
    pub config_path: PathBuf,
    /// OpenVPN credentials file; other backends carry `None`
    pub auth_path: Option<PathBuf>,
    pub ready_attempts: u32,
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct Registry {
    backends: BackendPaths,
    timeouts: TimeoutSettings,
    env: EnvLookup,
}

impl Registry {
    /// Registry reading overrides from the process environment
    pub fn new(config: &VpnctlConfig) -> Self {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    pub fn with_env<F>(config: &VpnctlConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            backends: config.backends.clone(),
            timeouts: config.timeouts.clone(),
            env: Box::new(env),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|v| !v.trim().is_empty())
    }

    /// Explicit choice, else `VPN_PROTOCOL`, else OpenVPN
    pub fn select(&self, explicit: Option<Protocol>) -> VpnResult<Protocol> {
        if let Some(protocol) = explicit {
            return Ok(protocol);
        }
        match self.var(PROTOCOL_ENV) {
            Some(value) => value.parse(),
            None => Ok(Protocol::OpenVpn),
        }
    }

    pub fn config_path(&self, protocol: Protocol) -> PathBuf {
        let path = self
            .var(protocol.config_env())
            .map(PathBuf::from)
            .unwrap_or_else(|| protocol.default_config(&self.backends).to_path_buf());
        absolutize(path)
    }

    fn auth_path(&self) -> PathBuf {
        absolutize(
            self.var(OPENVPN_AUTH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| self.backends.openvpn_auth.clone()),
        )
    }

    /// Spec without the existence check, for teardown and status
    pub fn spec(&self, protocol: Protocol) -> BackendSpec {
        BackendSpec {
            protocol,
            config_path: self.config_path(protocol),
            auth_path: (protocol == Protocol::OpenVpn).then(|| self.auth_path()),
            ready_attempts: protocol.ready_attempts(&self.timeouts),
        }
    }

    /// Spec for a connect; fails with `ConfigNotFound` if the file is missing
    pub fn resolve(&self, protocol: Protocol) -> VpnResult<BackendSpec> {
        let spec = self.spec(protocol);
        if !spec.config_path.is_file() {
            return Err(VpnError::ConfigNotFound {
                protocol: protocol.display_name().to_string(),
                path: spec.config_path,
            });
        }
        Ok(spec)
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
