// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for lifecycle helpers.

use super::*;
use serial_test::serial;
use std::os::unix::net::UnixDatagram;

#[test]
#[serial]
fn config_load_resolves_from_environment() {
    std::env::set_var("SYSTEMD_SYSUPDATE_PATH", "/opt/worker");
    std::env::set_var("SYSTEMD_SYSUPDATE_NO_VERIFY", "yes");

    let config = Config::load();
    assert_eq!(config.worker_path, PathBuf::from("/opt/worker"));
    assert!(config.no_verify);
    assert_eq!(config.notify_socket, PathBuf::from(env::NOTIFY_SOCKET_PATH));
    assert_eq!(config.exit_idle, DEFAULT_EXIT_IDLE);

    std::env::remove_var("SYSTEMD_SYSUPDATE_PATH");
    std::env::remove_var("SYSTEMD_SYSUPDATE_NO_VERIFY");
}

#[test]
#[serial]
fn sd_notify_reaches_the_service_manager_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mgr-notify");
    let receiver = UnixDatagram::bind(&path).unwrap();

    std::env::set_var("NOTIFY_SOCKET", &path);
    sd_notify("READY=1");
    std::env::remove_var("NOTIFY_SOCKET");

    let mut buf = [0u8; 64];
    let n = receiver.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"READY=1");
}

#[test]
#[serial]
fn sd_notify_without_socket_is_a_no_op() {
    std::env::remove_var("NOTIFY_SOCKET");
    sd_notify("READY=1");
}
