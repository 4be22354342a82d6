//! Integration tests for the vpnctl and vpnctl-dns-hook binaries
//!
//! Every test roots all runtime paths in a temp dir through a generated
//! config file, so nothing touches /etc or /run.

use assert_cmd::Command;
use libvpnctl::config::VpnctlConfig;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const RESOLV: &str = "# Generated by NetworkManager\nsearch lan\nnameserver 192.168.1.1\n";

/// Write a config rooted at `dir` and return its path
fn rooted_config(dir: &Path) -> PathBuf {
    let path = dir.join("vpnctl.toml");
    let mut config = VpnctlConfig::rooted_at(dir);
    config.timeouts.interval_ms = 0;
    config.save(&path).unwrap();
    path
}

fn vpnctl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vpnctl").unwrap();
    cmd.env("VPNCTL_CONFIG", config)
        .env_remove("VPN_PROTOCOL")
        .env_remove("OPENVPN_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn dns_hook(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vpnctl-dns-hook").unwrap();
    cmd.env("VPNCTL_CONFIG", config).env_remove("script_type");
    cmd
}

#[test]
fn test_help_command() {
    Command::cargo_bin("vpnctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("one VPN tunnel at a time"))
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("disconnect"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_connect_with_missing_openvpn_config() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());
    let missing = dir.path().join("nowhere/client.ovpn");

    vpnctl(&config)
        .env("VPN_PROTOCOL", "openvpn")
        .env("OPENVPN_CONFIG", &missing)
        .arg("connect")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(format!("No OpenVPN config at: {}", missing.display())));

    // Failed before any session was recorded
    assert!(!dir.path().join("run/session.json").exists());
    assert!(!dir.path().join("log/openvpn.log").exists());
}

#[test]
fn test_connect_unknown_protocol_argument() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());

    vpnctl(&config)
        .args(["connect", "l2tp"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Unknown VPN protocol 'l2tp'"));
}

#[test]
fn test_connect_unknown_protocol_from_environment() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());

    vpnctl(&config)
        .env("VPN_PROTOCOL", "sstp")
        .arg("connect")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Unknown VPN protocol 'sstp'"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("vpnctl.toml");
    fs::write(&config, "[timeouts]\nwireguard_attempts = 0\n").unwrap();

    vpnctl(&config)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("wireguard_attempts must be greater than 0"));
}

#[test]
fn test_status_json_is_valid() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());

    let output = vpnctl(&config).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["backends"].is_array());
}

#[test]
fn test_dns_hook_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());
    let resolv = dir.path().join("resolv.conf");
    fs::write(&resolv, RESOLV).unwrap();

    dns_hook(&config)
        .env("script_type", "up")
        .env("foreign_option_1", "dhcp-option DNS 10.8.0.1")
        .env("foreign_option_2", "dhcp-option DOMAIN corp.example")
        .args(["tun0", "1500", "1553", "10.8.0.2", "255.255.255.0", "init"])
        .assert()
        .success();

    let applied = fs::read_to_string(&resolv).unwrap();
    let vpn = applied.find("nameserver 10.8.0.1").unwrap();
    let fallback = applied.find("nameserver 192.168.1.1").unwrap();
    assert!(vpn < fallback);
    assert!(applied.contains("search corp.example"));

    dns_hook(&config).args(["--action", "down"]).assert().success();
    assert_eq!(fs::read_to_string(&resolv).unwrap(), RESOLV);
    assert!(!dir.path().join("resolv.conf.vpnctl.bak").exists());
}

#[test]
fn test_dns_hook_requires_an_action() {
    let dir = TempDir::new().unwrap();
    let config = rooted_config(dir.path());

    dns_hook(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("script_type"));
}
