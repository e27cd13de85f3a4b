// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Compile-time default location of the worker binary.
pub const DEFAULT_WORKER_PATH: &str = "/usr/lib/systemd/systemd-sysupdate";

/// Fixed filesystem path of the worker notification socket.
pub const NOTIFY_SOCKET_PATH: &str = "/run/systemd/sysupdate/notify";

/// Worker binary path: `SYSTEMD_SYSUPDATE_PATH` > compile-time default.
pub fn worker_path() -> PathBuf {
    match std::env::var("SYSTEMD_SYSUPDATE_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_WORKER_PATH),
    }
}

/// Whether workers should be invoked with `--verify=no` (for testing).
pub fn no_verify() -> bool {
    std::env::var("SYSTEMD_SYSUPDATE_NO_VERIFY")
        .ok()
        .and_then(|v| parse_boolean(&v))
        .unwrap_or(false)
}

/// Boolean parsing with the same vocabulary the rest of the systemd
/// ecosystem accepts.
pub fn parse_boolean(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "y" | "true" | "t" | "on" => Some(true),
        "0" | "no" | "n" | "false" | "f" | "off" => Some(false),
        _ => None,
    }
}

/// Service-manager notification socket for the daemon itself, if any.
pub fn sd_notify_socket() -> Option<String> {
    std::env::var("NOTIFY_SOCKET").ok().filter(|s| !s.is_empty())
}

/// Watchdog keep-alive interval requested by the service manager.
///
/// Honors `WATCHDOG_PID` scoping; returns half the configured timeout,
/// which is the conventional ping cadence.
pub fn watchdog_interval() -> Option<Duration> {
    if let Ok(pid) = std::env::var("WATCHDOG_PID") {
        if pid.parse::<u32>().ok() != Some(std::process::id()) {
            return None;
        }
    }
    let usec = std::env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if usec == 0 {
        return None;
    }
    Some(Duration::from_micros(usec / 2).max(Duration::from_millis(100)))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
