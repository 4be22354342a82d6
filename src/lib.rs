//! vpnctl - VPN Session Library
//!
//! Keeps at most one VPN tunnel alive on a host, across four backends driven
//! through their own tools:
//! - OpenVPN (`openvpn`)
//! - WireGuard (`wg-quick`)
//! - IPsec/IKEv2 (strongSwan `ipsec`)
//! - PPTP (`pppd`)
//!
//! Also provides the resolver up/down hook run by OpenVPN.

pub mod error;
pub mod config;
pub mod validation;
pub mod host;
pub mod poll;
pub mod session;
pub mod dns;
pub mod vpn;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{VpnError, VpnResult};
pub use config::{TimeoutPolicy, VpnctlConfig};
pub use host::{Host, SystemHost};
pub use poll::{poll_until, RetryPolicy};
pub use session::{SessionState, VpnSession};
pub use dns::{DnsConfig, DnsHook};
pub use vpn::{
    ConnectOutcome, DisconnectReport, Protocol, StatusReport, VpnBackend, VpnManager,
};
