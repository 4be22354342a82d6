//! Session record shared between CLI invocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::VpnResult;
use crate::vpn::Protocol;

/// Connection state for a VPN session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed(String),
}

impl SessionState {
    /// Counts against the one-active-tunnel limit
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
            SessionState::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnSession {
    pub protocol: Protocol,
    pub interface: String,
    pub pid: Option<u32>,
    pub address: Option<Ipv4Addr>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl VpnSession {
    pub fn new(protocol: Protocol, interface: String) -> Self {
        Self {
            protocol,
            interface,
            pid: None,
            address: None,
            state: SessionState::Connecting,
            started_at: Utc::now(),
        }
    }
}

/// JSON file holding at most one session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Missing or unreadable records load as `None`
    pub async fn load(&self) -> Option<VpnSession> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring corrupt session record {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub async fn save(&self, session: &VpnSession) -> VpnResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved session: {} {}", session.protocol, session.state);
        Ok(())
    }

    pub async fn clear(&self) -> VpnResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(!SessionState::Disconnected.is_active());
        assert!(!SessionState::Disconnecting.is_active());
        assert!(!SessionState::Failed("timeout".into()).is_active());
    }

    #[tokio::test]
    async fn test_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("run/session.json"));
        assert!(store.load().await.is_none());

        let mut session = VpnSession::new(Protocol::WireGuard, "wg0".to_string());
        session.state = SessionState::Connected;
        session.address = Some(Ipv4Addr::new(10, 0, 0, 2));
        store.save(&session).await.unwrap();

        assert_eq!(store.load().await, Some(session));

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SessionStore::new(path).load().await.is_none());
    }
}
