use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{VpnError, VpnResult};
use crate::host::{CommandOutput, Host, Invocation, Signal};
use crate::poll::{poll_until, RetryPolicy};
use super::backend::Liveness;
use super::registry::Protocol;

/// Common VPN utility functions shared across all backends

/// Ensure a directory exists, creating it if necessary
pub async fn ensure_directory_exists(path: &Path) -> VpnResult<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            VpnError::ServiceError(format!("Failed to create directory {:?}: {}", path, e))
        })?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Create the parent directory of `path` if needed
pub async fn ensure_parent_exists(path: &Path) -> VpnResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_directory_exists(parent).await,
        _ => Ok(()),
    }
}

/// Write configuration to a file securely (with appropriate permissions).
/// A symlink at `path` is refused rather than followed.
pub async fn write_secure_config(path: &Path, content: &[u8], permissions: u32) -> VpnResult<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    write_with(path, content, permissions, options).await
}

/// Like [`write_secure_config`], but `path` must not exist yet. Used for
/// secrets placed in shared directories such as /tmp.
pub async fn write_private_file(path: &Path, content: &[u8], permissions: u32) -> VpnResult<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    write_with(path, content, permissions, options).await
}

async fn write_with(
    path: &Path,
    content: &[u8],
    permissions: u32,
    mut options: tokio::fs::OpenOptions,
) -> VpnResult<()> {
    use std::os::unix::fs::PermissionsExt;

    ensure_parent_exists(path).await?;
    let mut file = options
        .mode(permissions)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .await
        .map_err(|e| VpnError::ServiceError(format!("Failed to open {:?}: {}", path, e)))?;

    // mode() only applies on creation and is masked by the umask
    file.set_permissions(std::fs::Permissions::from_mode(permissions))
        .await
        .map_err(|e| VpnError::ServiceError(format!("Failed to set permissions on {:?}: {}", path, e)))?;
    file.write_all(content)
        .await
        .map_err(|e| VpnError::ServiceError(format!("Failed to write {:?}: {}", path, e)))?;
    file.flush().await?;

    debug!("Wrote {:?} with permissions {:o}", path, permissions);
    Ok(())
}

async fn read_source(source: &Path) -> VpnResult<Vec<u8>> {
    tokio::fs::read(source)
        .await
        .map_err(|e| VpnError::ServiceError(format!("Failed to read {:?}: {}", source, e)))
}

/// Copy `source` to `dest` and restrict `dest` to `permissions`
pub async fn install_secure_copy(source: &Path, dest: &Path, permissions: u32) -> VpnResult<()> {
    let content = read_source(source).await?;
    write_secure_config(dest, &content, permissions).await
}

/// Copy `source` to a fresh `dest`; fails if anything already sits there
pub async fn install_private_copy(source: &Path, dest: &Path, permissions: u32) -> VpnResult<()> {
    let content = read_source(source).await?;
    write_private_file(dest, &content, permissions).await
}

/// Delete a file if it exists
pub async fn delete_config_file(path: &Path) -> VpnResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Deleted file: {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VpnError::ServiceError(format!("Failed to delete {:?}: {}", path, e))),
    }
}

/// Append a command and its captured output to a backend log
pub async fn append_log(log: &Path, cmd: &Invocation, output: &CommandOutput) -> VpnResult<()> {
    ensure_parent_exists(log).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .await?;

    let mut entry = format!(
        "[{}] $ {} (exit {})\n",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        cmd,
        output.code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
    );
    for text in [&output.stdout, &output.stderr] {
        if !text.is_empty() {
            entry.push_str(text);
            if !text.ends_with('\n') {
                entry.push('\n');
            }
        }
    }
    file.write_all(entry.as_bytes()).await?;
    Ok(())
}

/// Run a command, record it in the backend log, fail on non-zero exit
pub async fn run_logged(host: &dyn Host, cmd: &Invocation, log: &Path) -> VpnResult<CommandOutput> {
    let output = host.run(cmd).await?;
    if let Err(e) = append_log(log, cmd, &output).await {
        warn!("Could not write {:?}: {}", log, e);
    }
    output.check(cmd)
}

/// Last `count` lines of a log file; empty when the file is missing
pub async fn tail_lines(path: &Path, count: usize) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    lines[lines.len().saturating_sub(count)..]
        .iter()
        .map(|line| line.to_string())
        .collect()
}

/// PID recorded by a daemon's `--writepid` style option
pub async fn read_pid_file(path: &Path) -> Option<u32> {
    tokio::fs::read_to_string(path)
        .await
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Liveness of a backend that owns one process and one interface
pub async fn interface_liveness(host: &dyn Host, interface: &str, pid: Option<u32>) -> Liveness {
    let interface_present = host.interface_exists(interface).await;
    let address = if interface_present {
        host.interface_ipv4(interface).await
    } else {
        None
    };

    Liveness {
        pid,
        process_running: pid.is_some(),
        interface_present,
        address,
        ready: interface_present && address.is_some(),
    }
}

/// SIGTERM, wait for exit within `policy`, then SIGKILL as a last resort
pub async fn terminate_process(host: &dyn Host, protocol: Protocol, pid: u32, policy: RetryPolicy) -> VpnResult<()> {
    info!("Stopping {} (PID: {})", protocol, pid);
    host.signal(pid, Signal::Term).await?;

    let exited = poll_until(policy, |_| async move {
        (!host.process_alive(pid).await).then_some(())
    })
    .await;

    if exited.is_some() {
        debug!("{} process {} exited", protocol, pid);
        return Ok(());
    }

    warn!("{} (PID: {}) ignored SIGTERM, sending SIGKILL", protocol, pid);
    host.signal(pid, Signal::Kill).await?;
    if host.process_alive(pid).await {
        return Err(VpnError::StopTimeout {
            protocol: protocol.display_name().to_string(),
            waited_secs: policy.budget().as_secs(),
        });
    }
    Ok(())
}

/// Wait for an interface to disappear after a stop command
pub async fn wait_interface_gone(host: &dyn Host, protocol: Protocol, interface: &str, policy: RetryPolicy) -> VpnResult<()> {
    let gone = poll_until(policy, |_| async move {
        (!host.interface_exists(interface).await).then_some(())
    })
    .await;

    gone.ok_or_else(|| VpnError::StopTimeout {
        protocol: protocol.display_name().to_string(),
        waited_secs: policy.budget().as_secs(),
    })
}
