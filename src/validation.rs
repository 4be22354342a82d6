//! Input validation and sanitization
//!
//! Names that end up on a command line or in the resolver file are checked
//! here first.

use crate::error::{VpnError, VpnResult};
use std::net::IpAddr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// strongSwan accepts longer connection names, but keep them sane
const MAX_CONNECTION_NAME_LEN: usize = 64;

/// Maximum length for error messages shown to users
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> VpnResult<()> {
    if name.is_empty() {
        return Err(VpnError::InvalidParameter(
            "Interface name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(VpnError::InvalidParameter(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    check_name_chars(name, "interface name", &['-', '_'])
}

/// Validate an IPsec connection name taken from a `conn <name>` line
pub fn validate_connection_name(name: &str) -> VpnResult<()> {
    if name.is_empty() {
        return Err(VpnError::InvalidParameter(
            "Connection name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_CONNECTION_NAME_LEN {
        return Err(VpnError::InvalidParameter(
            format!("Connection name too long (max {} characters)", MAX_CONNECTION_NAME_LEN)
        ));
    }

    check_name_chars(name, "connection name", &['-', '_', '.'])
}

fn check_name_chars(name: &str, what: &str, extra: &[char]) -> VpnResult<()> {
    // Only allow alphanumeric plus a few separators
    // This prevents shell metacharacters and command injection
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && !extra.contains(&c) {
            return Err(VpnError::InvalidParameter(
                format!("Invalid {} '{}': contains invalid character '{}'", what, name, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(VpnError::InvalidParameter(
            format!("Invalid {} '{}': cannot start with dash", what, name)
        ));
    }

    Ok(())
}

/// Validate a nameserver address pushed by the VPN server
pub fn validate_nameserver(addr: &str) -> VpnResult<IpAddr> {
    addr.parse::<IpAddr>()
        .map_err(|_| VpnError::InvalidParameter(
            format!("Invalid nameserver address: {}", addr)
        ))
}

/// Validate a DNS search domain
pub fn validate_search_domain(domain: &str) -> VpnResult<()> {
    if domain.is_empty() {
        return Err(VpnError::InvalidParameter(
            "Search domain cannot be empty".to_string()
        ));
    }

    if domain.len() > 253 {
        return Err(VpnError::InvalidParameter(
            "Search domain too long".to_string()
        ));
    }

    // Domains can contain alphanumeric, dash, and dots
    for c in domain.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '.' {
            return Err(VpnError::InvalidParameter(
                format!("Invalid search domain character: {}", c)
            ));
        }
    }

    // No leading/trailing dashes or dots
    if domain.starts_with('-') || domain.starts_with('.') ||
       domain.ends_with('-') || domain.ends_with('.') {
        return Err(VpnError::InvalidParameter(
            format!("Invalid search domain format: {}", domain)
        ));
    }

    Ok(())
}

/// Trim tool stderr before it is shown to users
pub fn sanitize_error_message(stderr: &str) -> String {
    let mut sanitized = stderr.trim().to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("... (truncated)");
    }

    sanitized
}
