//! Configuration management for vpnctl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{VpnError, VpnResult};

/// Default location of the optional config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vpnctl/vpnctl.toml";

/// Main vpnctl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnctlConfig {
    /// Runtime file locations
    #[serde(default)]
    pub paths: RuntimePaths,
    /// Default backend config files (environment variables override these)
    #[serde(default)]
    pub backends: BackendPaths,
    /// Readiness and stop-wait budgets
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimePaths {
    /// Runtime state directory (session record, pid files)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Backend log directory
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// System resolver file managed by the DNS hook
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,
    /// Directory strongSwan includes connection profiles from
    #[serde(default = "default_ipsec_dir")]
    pub ipsec_dir: PathBuf,
    /// Transient copy of the OpenVPN credentials
    #[serde(default = "default_auth_temp")]
    pub auth_temp: PathBuf,
    /// Executable OpenVPN runs on up/down
    #[serde(default = "default_dns_hook")]
    pub dns_hook: PathBuf,
    /// Config file these paths were loaded from, handed on to the DNS hook
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPaths {
    #[serde(default = "default_openvpn_config")]
    pub openvpn: PathBuf,
    #[serde(default = "default_openvpn_auth")]
    pub openvpn_auth: PathBuf,
    #[serde(default = "default_wireguard_config")]
    pub wireguard: PathBuf,
    #[serde(default = "default_ipsec_config")]
    pub ipsec: PathBuf,
    #[serde(default = "default_pptp_config")]
    pub pptp: PathBuf,
}

/// What to do with a backend whose interface never came up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Leave the spawned process running for manual diagnosis
    #[default]
    #[serde(alias = "leave")]
    LeaveRunning,
    /// Stop the spawned backend before reporting the failure
    #[serde(alias = "teardown")]
    TearDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Delay between readiness probes (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_long_attempts")]
    pub openvpn_attempts: u32,
    #[serde(default = "default_short_attempts")]
    pub wireguard_attempts: u32,
    #[serde(default = "default_short_attempts")]
    pub ipsec_attempts: u32,
    #[serde(default = "default_long_attempts")]
    pub pptp_attempts: u32,
    /// Probes to wait for a backend to exit after a stop request
    #[serde(default = "default_short_attempts")]
    pub stop_attempts: u32,
    #[serde(default)]
    pub on_timeout: TimeoutPolicy,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/run/vpnctl")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/vpnctl")
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_ipsec_dir() -> PathBuf {
    PathBuf::from("/etc/ipsec.d")
}

fn default_auth_temp() -> PathBuf {
    PathBuf::from("/tmp/vpnctl-openvpn-auth")
}

fn default_dns_hook() -> PathBuf {
    PathBuf::from("/usr/bin/vpnctl-dns-hook")
}

fn default_openvpn_config() -> PathBuf {
    PathBuf::from("/etc/openvpn/client/client.ovpn")
}

fn default_openvpn_auth() -> PathBuf {
    PathBuf::from("/etc/openvpn/client/auth.txt")
}

fn default_wireguard_config() -> PathBuf {
    PathBuf::from("/etc/wireguard/wg0.conf")
}

fn default_ipsec_config() -> PathBuf {
    PathBuf::from("/etc/vpnctl/ipsec.conf")
}

fn default_pptp_config() -> PathBuf {
    PathBuf::from("/etc/ppp/peers/vpnctl")
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_long_attempts() -> u32 {
    15
}

fn default_short_attempts() -> u32 {
    10
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_dir: default_log_dir(),
            resolv_conf: default_resolv_conf(),
            ipsec_dir: default_ipsec_dir(),
            auth_temp: default_auth_temp(),
            dns_hook: default_dns_hook(),
            source: None,
        }
    }
}

impl Default for BackendPaths {
    fn default() -> Self {
        Self {
            openvpn: default_openvpn_config(),
            openvpn_auth: default_openvpn_auth(),
            wireguard: default_wireguard_config(),
            ipsec: default_ipsec_config(),
            pptp: default_pptp_config(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            openvpn_attempts: default_long_attempts(),
            wireguard_attempts: default_short_attempts(),
            ipsec_attempts: default_short_attempts(),
            pptp_attempts: default_long_attempts(),
            stop_attempts: default_short_attempts(),
            on_timeout: TimeoutPolicy::default(),
        }
    }
}

impl TimeoutSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RuntimePaths {
    pub fn session_file(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn openvpn_pid_file(&self) -> PathBuf {
        self.state_dir.join("openvpn.pid")
    }

    pub fn log_file(&self, backend: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", backend))
    }

    /// Sidecar holding the pre-tunnel resolver content
    pub fn resolv_backup(&self) -> PathBuf {
        let mut name = self.resolv_conf.as_os_str().to_os_string();
        name.push(".vpnctl.bak");
        PathBuf::from(name)
    }
}

impl VpnctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> VpnResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VpnError::ConfigError(format!("Failed to read config: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| VpnError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        // OpenVPN daemonizes into /, so the hook needs an absolute path
        let source = path.as_ref();
        config.paths.source = Some(std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf()));
        Ok(config)
    }

    /// Load from an explicit path, `VPNCTL_CONFIG`, or the default location
    /// if it exists; otherwise fall back to built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> VpnResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var("VPNCTL_CONFIG") {
            return Self::load(path);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load(default);
        }
        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> VpnResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VpnError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| VpnError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> VpnResult<()> {
        let t = &self.timeouts;
        for (name, attempts) in [
            ("openvpn_attempts", t.openvpn_attempts),
            ("wireguard_attempts", t.wireguard_attempts),
            ("ipsec_attempts", t.ipsec_attempts),
            ("pptp_attempts", t.pptp_attempts),
            ("stop_attempts", t.stop_attempts),
        ] {
            if attempts == 0 {
                return Err(VpnError::ConfigError(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    /// Config rooted entirely under `root`, used by tests and dry runs
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();
        config.paths = RuntimePaths {
            state_dir: root.join("run"),
            log_dir: root.join("log"),
            resolv_conf: root.join("resolv.conf"),
            ipsec_dir: root.join("ipsec.d"),
            auth_temp: root.join("vpnctl-openvpn-auth"),
            dns_hook: root.join("vpnctl-dns-hook"),
            source: None,
        };
        config.backends = BackendPaths {
            openvpn: root.join("client.ovpn"),
            openvpn_auth: root.join("auth.txt"),
            wireguard: root.join("wg0.conf"),
            ipsec: root.join("ipsec.conf"),
            pptp: root.join("pptp"),
        };
        config
    }
}
