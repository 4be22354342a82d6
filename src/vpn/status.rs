//! Composite status report across all backends

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::session::SessionState;
use super::registry::Protocol;

/// Log lines included per live backend
pub const STATUS_LOG_LINES: usize = 5;

/// One live backend as seen by a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub protocol: Protocol,
    pub state: SessionState,
    pub interface: String,
    pub pid: Option<u32>,
    pub address: Option<Ipv4Addr>,
    /// From the session record, when it names this backend
    pub started_at: Option<DateTime<Utc>>,
    pub log_tail: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Live backends only, in teardown order
    pub backends: Vec<BackendStatus>,
}

impl StatusReport {
    pub fn is_disconnected(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends whose tunnel is up and addressed
    pub fn connected(&self) -> impl Iterator<Item = &BackendStatus> {
        self.backends.iter().filter(|b| b.state == SessionState::Connected)
    }

    pub fn get(&self, protocol: Protocol) -> Option<&BackendStatus> {
        self.backends.iter().find(|b| b.protocol == protocol)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Protocol: {}", self.protocol)?;
        writeln!(f, "State: {}", self.state)?;
        match self.address {
            Some(addr) => writeln!(f, "Interface: {} ({})", self.interface, addr)?,
            None => writeln!(f, "Interface: {}", self.interface)?,
        }
        match self.pid {
            Some(pid) => writeln!(f, "PID: {}", pid)?,
            None => writeln!(f, "PID: -")?,
        }
        write!(f, "Recent log:")?;
        for line in &self.log_tail {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.backends.is_empty() {
            return write!(f, "DISCONNECTED");
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if i > 0 {
                write!(f, "\n\n")?;
            }
            write!(f, "{}", backend)?;
        }
        Ok(())
    }
}
