//! Resolver reconciliation for OpenVPN up/down events
//!
//! On up, the current resolver file is copied to a sidecar backup (only if
//! no backup exists yet) and replaced with VPN nameservers and search domains
//! followed by the original nameservers. On down, the backup is renamed back
//! over the resolver file, which also removes the backup marker.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::RuntimePaths;
use crate::error::VpnResult;
use crate::validation;

/// Upper bound on `foreign_option_<n>` variables scanned
const MAX_FOREIGN_OPTIONS: usize = 256;

/// DNS settings delivered by the VPN plus the pre-VPN fallback servers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsConfig {
    pub nameservers: Vec<IpAddr>,
    pub search_domains: Vec<String>,
    pub fallback: Vec<IpAddr>,
}

impl DnsConfig {
    /// Parse OpenVPN pushed options such as `dhcp-option DNS 10.8.0.1`
    pub fn from_foreign_options<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();

        for option in options {
            let parts: Vec<&str> = option.as_ref().split_whitespace().collect();
            let (kind, value) = match parts.as_slice() {
                ["dhcp-option", kind, value, ..] => (kind.to_ascii_uppercase(), *value),
                _ => continue,
            };

            match kind.as_str() {
                "DNS" | "DNS6" => match validation::validate_nameserver(value) {
                    Ok(addr) if !config.nameservers.contains(&addr) => config.nameservers.push(addr),
                    Ok(_) => {}
                    Err(e) => warn!("Skipping pushed nameserver: {}", e),
                },
                "DOMAIN" | "DOMAIN-SEARCH" => match validation::validate_search_domain(value) {
                    Ok(()) if !config.search_domains.iter().any(|d| d == value) => {
                        config.search_domains.push(value.to_string())
                    }
                    Ok(()) => {}
                    Err(e) => warn!("Skipping pushed search domain: {}", e),
                },
                other => debug!("Ignoring dhcp-option {}", other),
            }
        }

        config
    }

    /// Attach pre-VPN nameservers, dropping any the VPN already provides
    pub fn with_fallback(mut self, original: Vec<IpAddr>) -> Self {
        self.fallback = original
            .into_iter()
            .filter(|addr| !self.nameservers.contains(addr))
            .collect();
        self
    }

    /// Resolver file content: VPN servers and domains first, originals last
    pub fn render(&self) -> String {
        let mut out = String::from("# Generated by vpnctl-dns-hook; restored on disconnect\n");
        for ns in &self.nameservers {
            out.push_str(&format!("nameserver {}\n", ns));
        }
        if !self.search_domains.is_empty() {
            out.push_str(&format!("search {}\n", self.search_domains.join(" ")));
        }
        for ns in &self.fallback {
            out.push_str(&format!("nameserver {}\n", ns));
        }
        out
    }
}

/// Collect `foreign_option_1..n` from an environment lookup, stopping at the
/// first gap the way OpenVPN numbers them
pub fn foreign_options_from_env<F>(env: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    (1..=MAX_FOREIGN_OPTIONS)
        .map(|n| env(&format!("foreign_option_{}", n)))
        .take_while(Option::is_some)
        .flatten()
        .collect()
}

/// `nameserver` entries of a resolver file, in order
pub fn parse_nameservers(content: &str) -> Vec<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpOutcome {
    /// Resolver rewritten; `backup_taken` is false when an earlier up
    /// already holds the snapshot
    Applied { backup_taken: bool },
    /// The VPN pushed no nameservers; resolver left alone
    NoVpnDns,
}

/// Up/down transitions over one resolver file and its sidecar backup
#[derive(Debug, Clone)]
pub struct DnsHook {
    resolv_conf: PathBuf,
    backup: PathBuf,
}

impl DnsHook {
    pub fn new(resolv_conf: PathBuf, backup: PathBuf) -> Self {
        Self { resolv_conf, backup }
    }

    pub fn from_paths(paths: &RuntimePaths) -> Self {
        Self::new(paths.resolv_conf.clone(), paths.resolv_backup())
    }

    pub fn resolv_conf(&self) -> &Path {
        &self.resolv_conf
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    pub async fn has_backup(&self) -> bool {
        tokio::fs::try_exists(&self.backup).await.unwrap_or(false)
    }

    pub async fn up(&self, vpn: DnsConfig) -> VpnResult<UpOutcome> {
        if vpn.nameservers.is_empty() {
            info!("VPN pushed no nameservers; leaving {:?} untouched", self.resolv_conf);
            return Ok(UpOutcome::NoVpnDns);
        }

        let backup_taken = if self.has_backup().await {
            // A second up must not snapshot the VPN's own resolver state
            debug!("Resolver backup already present at {:?}", self.backup);
            false
        } else {
            self.snapshot().await?;
            true
        };

        let original = tokio::fs::read_to_string(&self.backup).await.unwrap_or_default();
        let config = vpn.with_fallback(parse_nameservers(&original));

        let target = self.write_target().await;
        let tmp = sibling(&target, "vpnctl.tmp");
        tokio::fs::write(&tmp, config.render()).await?;
        tokio::fs::rename(&tmp, &target).await?;

        info!(
            "Resolver updated: {} VPN nameserver(s), {} search domain(s), {} fallback",
            config.nameservers.len(),
            config.search_domains.len(),
            config.fallback.len()
        );
        Ok(UpOutcome::Applied { backup_taken })
    }

    /// Restore the snapshot; returns false when there was nothing to restore
    pub async fn down(&self) -> VpnResult<bool> {
        if !self.has_backup().await {
            debug!("No resolver backup at {:?}; nothing to restore", self.backup);
            return Ok(false);
        }

        // rename keeps a resolver file in place at every instant
        let target = self.write_target().await;
        if target == self.resolv_conf {
            tokio::fs::rename(&self.backup, &self.resolv_conf).await?;
        } else {
            let tmp = sibling(&target, "vpnctl.tmp");
            tokio::fs::copy(&self.backup, &tmp).await?;
            tokio::fs::rename(&tmp, &target).await?;
            tokio::fs::remove_file(&self.backup).await?;
        }
        info!("Resolver restored from {:?}", self.backup);
        Ok(true)
    }

    /// File actually replaced on up/down. A symlinked resolver (as with
    /// systemd-resolved) is written through so the link survives.
    async fn write_target(&self) -> PathBuf {
        let Ok(link) = tokio::fs::read_link(&self.resolv_conf).await else {
            return self.resolv_conf.clone();
        };
        match tokio::fs::canonicalize(&self.resolv_conf).await {
            Ok(target) => target,
            Err(_) => match self.resolv_conf.parent() {
                Some(dir) => dir.join(link),
                None => link,
            },
        }
    }

    async fn snapshot(&self) -> VpnResult<()> {
        let tmp = sibling(&self.resolv_conf, "vpnctl.bak.tmp");
        match tokio::fs::copy(&self.resolv_conf, &tmp).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{:?} does not exist; backing up an empty resolver", self.resolv_conf);
                tokio::fs::write(&tmp, b"").await?;
            }
            Err(e) => return Err(e.into()),
        }
        tokio::fs::rename(&tmp, &self.backup).await?;
        debug!("Resolver snapshot saved to {:?}", self.backup);
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
