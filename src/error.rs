//! Error types for vpnctl

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VpnError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Backend config file missing; raised before anything is launched
    #[error("No {protocol} config at: {}", .path.display())]
    ConfigNotFound { protocol: String, path: PathBuf },

    /// Readiness poll exhausted its attempt budget
    #[error("{interface} not detected after {waited_secs}s")]
    ConnectTimeout { interface: String, waited_secs: u64 },

    /// Backend process still alive after the stop-wait budget
    #[error("{protocol} still running {waited_secs}s after stop request")]
    StopTimeout { protocol: String, waited_secs: u64 },

    /// Command execution failed
    #[error("Command '{cmd}' failed{}: {stderr}", .code.map(|c| format!(" with code {}", c)).unwrap_or_default())]
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Service error (failed to launch or talk to a backend tool)
    #[error("Service error: {0}")]
    ServiceError(String),
}

impl From<serde_json::Error> for VpnError {
    fn from(error: serde_json::Error) -> Self {
        VpnError::ParseError(error.to_string())
    }
}

pub type VpnResult<T> = Result<T, VpnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_messages() {
        let err = VpnError::ConfigNotFound {
            protocol: "OpenVPN".to_string(),
            path: PathBuf::from("/etc/openvpn/client/missing.ovpn"),
        };
        assert_eq!(err.to_string(), "No OpenVPN config at: /etc/openvpn/client/missing.ovpn");

        let err = VpnError::ConnectTimeout { interface: "tun0".to_string(), waited_secs: 15 };
        assert_eq!(err.to_string(), "tun0 not detected after 15s");
    }

    #[test]
    fn test_command_failed_display() {
        let err = VpnError::CommandFailed {
            cmd: "wg-quick up wg0".to_string(),
            code: Some(1),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Command 'wg-quick up wg0' failed with code 1: boom");

        let err = VpnError::CommandFailed { cmd: "ipsec".to_string(), code: None, stderr: "gone".to_string() };
        assert_eq!(err.to_string(), "Command 'ipsec' failed: gone");
    }
}
