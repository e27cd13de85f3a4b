// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker notification socket.
//!
//! A Unix datagram socket at a fixed path, shared by every worker. Sender
//! identity comes from kernel-attached credentials (`SO_PASSCRED`), which
//! is what lets one socket serve any number of concurrent workers.

use std::io::{self, IoSliceMut};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use nix::sys::socket::{self, sockopt, ControlMessageOwned, MsgFlags, UnixCredentials};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Largest accepted datagram. Anything bigger is flagged truncated and
/// discarded by the dispatcher.
pub const NOTIFY_BUFFER_MAX: usize = 4096;

/// One received notification datagram.
#[derive(Debug)]
pub struct Datagram {
    /// Sender pid from `SCM_CREDENTIALS`, if the kernel attached any.
    pub pid: Option<i32>,
    pub data: Vec<u8>,
    pub truncated: bool,
}

/// The bound notification socket.
pub struct NotifySocket {
    fd: AsyncFd<UnixDatagram>,
}

impl NotifySocket {
    /// Bind at `path`, replacing any stale socket file, with credential
    /// passing enabled.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let sock = UnixDatagram::bind(path)?;
        sock.set_nonblocking(true)?;
        socket::setsockopt(&sock, sockopt::PassCred, &true).map_err(io::Error::from)?;

        Ok(Self { fd: AsyncFd::with_interest(sock, Interest::READABLE)? })
    }

    /// Receive the next datagram, waiting for readiness.
    pub async fn recv(&self) -> io::Result<Datagram> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recv_datagram(inner.get_ref())) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Drain whatever is already queued without blocking.
    ///
    /// Used right after a worker exit: the kernel queues a worker's final
    /// datagrams before its exit becomes observable, so draining here keeps
    /// status delivery ordered before completion handling.
    pub fn try_recv(&self) -> io::Result<Option<Datagram>> {
        match recv_datagram(self.fd.get_ref()) {
            Ok(d) => Ok(Some(d)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn recv_datagram(sock: &UnixDatagram) -> io::Result<Datagram> {
    let mut buf = [0u8; NOTIFY_BUFFER_MAX];
    let mut cmsg = nix::cmsg_space!(UnixCredentials);

    let (len, truncated, pid) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = socket::recvmsg::<()>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .map_err(io::Error::from)?;

        let mut pid = None;
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            if let ControlMessageOwned::ScmCredentials(creds) = cmsg {
                pid = Some(creds.pid());
            }
        }
        (msg.bytes, msg.flags.contains(MsgFlags::MSG_TRUNC), pid)
    };

    Ok(Datagram { pid, data: buf[..len].to_vec(), truncated })
}

/// Fields scanned out of a datagram's newline-separated `KEY=VALUE` lines.
/// Unknown keys are ignored; the first occurrence of each key wins.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub version: Option<String>,
    pub progress: Option<String>,
    pub errno: Option<String>,
    pub ready: bool,
}

pub fn parse_status(data: &[u8]) -> StatusUpdate {
    let text = String::from_utf8_lossy(data);
    let mut status = StatusUpdate::default();

    for line in text.lines() {
        if let Some(v) = line.strip_prefix("X_SYSUPDATE_VERSION=") {
            if status.version.is_none() {
                status.version = Some(v.to_string());
            }
        } else if let Some(v) = line.strip_prefix("X_SYSUPDATE_PROGRESS=") {
            if status.progress.is_none() {
                status.progress = Some(v.to_string());
            }
        } else if let Some(v) = line.strip_prefix("ERRNO=") {
            if status.errno.is_none() {
                status.errno = Some(v.to_string());
            }
        } else if line == "READY=1" {
            status.ready = true;
        }
    }

    status
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
