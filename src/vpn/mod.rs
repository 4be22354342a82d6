//! VPN session management
//!
//! One controller drives four backends through external tools, and at most
//! one of them is live at a time:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   VpnManager (connect/disconnect)   │
//! └──────────────┬──────────────────────┘
//!                │
//!    ┌───────────┼───────────┬──────────┐
//!    │           │           │          │
//!    ▼           ▼           ▼          ▼
//! ┌──────┐   ┌──────┐   ┌──────┐   ┌──────┐
//! │ OVPN │   │  WG  │   │IPsec │   │ PPTP │  <- Backend Drivers
//! └──────┘   └──────┘   └──────┘   └──────┘
//! ```
//!
//! Each driver implements [`VpnBackend`]; the [`Registry`] maps a protocol to
//! its config file and the manager builds drivers from registered factories.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use libvpnctl::config::VpnctlConfig;
//! use libvpnctl::host::SystemHost;
//! use libvpnctl::vpn::{Protocol, VpnManager};
//!
//! # async fn run() -> libvpnctl::error::VpnResult<()> {
//! let config = VpnctlConfig::discover(None)?;
//! let manager = VpnManager::new(&config, Arc::new(SystemHost::new()));
//!
//! let outcome = manager.connect(Some(Protocol::WireGuard)).await?;
//! println!("{}", outcome);
//! println!("{}", manager.status().await);
//! manager.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod common;
pub mod manager;
pub mod registry;
pub mod status;
pub mod openvpn;
pub mod wireguard;
pub mod ipsec;
pub mod pptp;

pub use backend::{BackendContext, Liveness, VpnBackend, VpnBackendFactory};
pub use manager::{ConnectOutcome, DisconnectReport, VpnManager};
pub use registry::{BackendSpec, Protocol, Registry};
pub use status::{BackendStatus, StatusReport};
