//! Operating system access
//!
//! Everything that touches processes or network interfaces goes through the
//! [`Host`] trait so the session logic can run against a fake in tests.

use async_trait::async_trait;
use std::fmt;
use std::fs::OpenOptions;
use std::net::Ipv4Addr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{VpnError, VpnResult};
use crate::validation;

/// A program plus its arguments, never passed through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `CommandFailed`
    pub fn check(self, cmd: &Invocation) -> VpnResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(VpnError::CommandFailed {
                cmd: cmd.to_string(),
                code: self.code,
                stderr: validation::sanitize_error_message(&self.stderr),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Host: Send + Sync {
    /// Run a command to completion and capture its output
    async fn run(&self, cmd: &Invocation) -> VpnResult<CommandOutput>;

    /// Start a command in its own process group with output appended to
    /// `log`, returning without waiting for it
    async fn spawn_detached(&self, cmd: &Invocation, log: &Path) -> VpnResult<u32>;

    /// PID of a running process whose name is exactly `name`
    async fn find_process(&self, name: &str) -> Option<u32>;

    async fn process_alive(&self, pid: u32) -> bool;

    async fn signal(&self, pid: u32, signal: Signal) -> VpnResult<()>;

    async fn interface_exists(&self, name: &str) -> bool;

    /// First IPv4 address assigned to `name`
    async fn interface_ipv4(&self, name: &str) -> Option<Ipv4Addr>;
}

/// [`Host`] backed by the real machine
#[derive(Debug, Default, Clone)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Host for SystemHost {
    async fn run(&self, cmd: &Invocation) -> VpnResult<CommandOutput> {
        debug!("Running: {}", cmd);
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| VpnError::CommandFailed {
                cmd: cmd.to_string(),
                code: None,
                stderr: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, cmd: &Invocation, log: &Path) -> VpnResult<u32> {
        debug!("Spawning detached: {} (log: {:?})", cmd, log);
        let out = OpenOptions::new().create(true).append(true).open(log)?;
        let err = out.try_clone()?;

        // std rather than tokio: the child must outlive this process and
        // must not be tracked by the runtime's reaper
        let child = std::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0)
            .spawn()
            .map_err(|e| VpnError::ServiceError(format!("Failed to start {}: {}", cmd.program, e)))?;

        Ok(child.id())
    }

    async fn find_process(&self, name: &str) -> Option<u32> {
        let output = Command::new("pgrep")
            .args(["-x", name])
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u32>().ok())
    }

    async fn process_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks existence and permission
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    async fn signal(&self, pid: u32, signal: Signal) -> VpnResult<()> {
        let raw_pid = libc::pid_t::try_from(pid)
            .map_err(|_| VpnError::InvalidParameter(format!("Invalid PID: {}", pid)))?;

        let rc = unsafe { libc::kill(raw_pid, signal.raw()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!("Process {} already gone", pid);
                return Ok(());
            }
            warn!("Failed to signal process {}: {}", pid, err);
            return Err(VpnError::Io(err));
        }

        debug!("Sent {:?} to process {}", signal, pid);
        Ok(())
    }

    async fn interface_exists(&self, name: &str) -> bool {
        if validation::validate_interface_name(name).is_err() {
            return false;
        }
        tokio::fs::try_exists(format!("/sys/class/net/{}", name))
            .await
            .unwrap_or(false)
    }

    async fn interface_ipv4(&self, name: &str) -> Option<Ipv4Addr> {
        validation::validate_interface_name(name).ok()?;

        let output = Command::new("ip")
            .args(["-json", "addr", "show", name])
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
        first_ipv4(&json)
    }
}

/// Pull the first `inet` address out of `ip -json addr show` output
pub fn first_ipv4(json: &serde_json::Value) -> Option<Ipv4Addr> {
    json.as_array()?
        .first()?
        .get("addr_info")?
        .as_array()?
        .iter()
        .filter(|addr| addr.get("family").and_then(|v| v.as_str()) == Some("inet"))
        .filter_map(|addr| addr.get("local").and_then(|v| v.as_str()))
        .find_map(|local| local.parse::<Ipv4Addr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_display() {
        let cmd = Invocation::new("wg-quick").arg("up").path_arg(Path::new("/etc/wireguard/wg0.conf"));
        assert_eq!(cmd.to_string(), "wg-quick up /etc/wireguard/wg0.conf");
        assert_eq!(cmd.args.len(), 2);
    }

    #[test]
    fn test_check_output() {
        let cmd = Invocation::new("ipsec").args(["up", "office"]);
        let ok = CommandOutput { code: Some(0), ..Default::default() };
        assert!(ok.check(&cmd).is_ok());

        let failed = CommandOutput { code: Some(2), stderr: "no such connection\n".into(), ..Default::default() };
        match failed.check(&cmd) {
            Err(VpnError::CommandFailed { cmd, code, stderr }) => {
                assert_eq!(cmd, "ipsec up office");
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "no such connection");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_first_ipv4() {
        let json = json!([{
            "ifname": "tun0",
            "addr_info": [
                {"family": "inet6", "local": "fe80::1", "prefixlen": 64},
                {"family": "inet", "local": "10.8.0.6", "prefixlen": 24}
            ]
        }]);
        assert_eq!(first_ipv4(&json), Some(Ipv4Addr::new(10, 8, 0, 6)));

        let no_v4 = json!([{"ifname": "wg0", "addr_info": []}]);
        assert_eq!(first_ipv4(&no_v4), None);
        assert_eq!(first_ipv4(&json!([])), None);
    }

    #[tokio::test]
    async fn test_system_host_rejects_bad_interface_names() {
        let host = SystemHost::new();
        assert!(!host.interface_exists("tun0; reboot").await);
        assert_eq!(host.interface_ipv4("../../etc").await, None);
    }
}
