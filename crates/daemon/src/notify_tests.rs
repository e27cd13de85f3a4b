// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the notify socket and status line scanning.

use super::*;

mod parsing {
    use super::*;

    #[test]
    fn scans_all_known_keys() {
        let status =
            parse_status(b"X_SYSUPDATE_VERSION=42.1\nX_SYSUPDATE_PROGRESS=50\nERRNO=5\nREADY=1\n");
        assert_eq!(
            status,
            StatusUpdate {
                version: Some("42.1".to_string()),
                progress: Some("50".to_string()),
                errno: Some("5".to_string()),
                ready: true,
            }
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let status = parse_status(b"STATUS=doing things\nMAINPID=42\n");
        assert_eq!(status, StatusUpdate::default());
    }

    #[test]
    fn first_occurrence_wins() {
        let status = parse_status(b"X_SYSUPDATE_PROGRESS=10\nX_SYSUPDATE_PROGRESS=90\n");
        assert_eq!(status.progress.as_deref(), Some("10"));
    }

    #[test]
    fn ready_must_be_exactly_one() {
        assert!(!parse_status(b"READY=0\n").ready);
        assert!(!parse_status(b"READY=11\n").ready);
        assert!(parse_status(b"READY=1").ready);
    }

    #[test]
    fn missing_trailing_newline_is_fine() {
        let status = parse_status(b"X_SYSUPDATE_VERSION=7");
        assert_eq!(status.version.as_deref(), Some("7"));
    }
}

mod socket {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    fn bound_socket(dir: &tempfile::TempDir) -> (NotifySocket, std::path::PathBuf) {
        let path = dir.path().join("notify");
        (NotifySocket::bind(&path).unwrap(), path)
    }

    #[tokio::test]
    async fn receives_datagram_with_sender_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (sock, path) = bound_socket(&dir);

        let sender = UnixDatagram::unbound().unwrap();
        sender.send_to(b"READY=1\n", &path).unwrap();

        let dgram = sock.recv().await.unwrap();
        assert_eq!(dgram.pid, Some(std::process::id() as i32));
        assert!(!dgram.truncated);
        assert_eq!(dgram.data, b"READY=1\n");
    }

    #[tokio::test]
    async fn oversize_datagram_is_flagged_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let (sock, path) = bound_socket(&dir);

        let sender = UnixDatagram::unbound().unwrap();
        sender.send_to(&vec![b'x'; NOTIFY_BUFFER_MAX + 1], &path).unwrap();

        let dgram = sock.recv().await.unwrap();
        assert!(dgram.truncated);
    }

    #[tokio::test]
    async fn try_recv_drains_queued_datagrams() {
        let dir = tempfile::tempdir().unwrap();
        let (sock, path) = bound_socket(&dir);

        let sender = UnixDatagram::unbound().unwrap();
        sender.send_to(b"A=1\n", &path).unwrap();
        sender.send_to(b"B=2\n", &path).unwrap();

        // Delivery to a bound unix socket is immediate.
        let first = sock.try_recv().unwrap().unwrap();
        let second = sock.try_recv().unwrap().unwrap();
        assert_eq!(first.data, b"A=1\n");
        assert_eq!(second.data, b"B=2\n");
        assert!(sock.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        drop(NotifySocket::bind(&path).unwrap());
        // Second bind must succeed over the leftover file.
        let _sock = NotifySocket::bind(&path).unwrap();
    }
}
