// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records and reply plumbing.

use nix::unistd::Pid;
use serde_json::Value;
use sysupdate_core::{JobKind, TargetId};
use thiserror::Error;
use tokio::sync::oneshot;

/// When the originating method call gets its reply.
///
/// Update jobs reply at readiness because their runtime is unbounded; the
/// final disposition is then surfaced through `JobRemoved`. Every other
/// verb replies at worker exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAt {
    Exit,
    Ready,
}

/// Successful outcome delivered to the originating method call.
#[derive(Debug)]
pub enum JobReply {
    /// Worker exited cleanly; the parsed stdout document (`None` when the
    /// worker produced no output).
    Document(Option<Value>),
    /// Worker passed its up-front sanity checks and keeps running.
    Detached { version: String },
}

/// Why a worker did not produce a usable document.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    #[error("Job terminated abnormally with signal {name}.")]
    Signaled { signo: i32, name: String },
    #[error("Job failed with exit code {code}.")]
    Exited { code: i32 },
    #[error("{}", nix::errno::Errno::from_raw(*errno).desc())]
    Errno { errno: i32 },
    #[error("Failed to parse job worker output: {0}")]
    BadOutput(String),
    #[error("Failed to wait for worker: {0}")]
    Wait(std::io::Error),
}

pub(crate) type ReplySender = oneshot::Sender<Result<JobReply, WorkerFailure>>;

/// One in-flight worker invocation.
pub(crate) struct JobEntry {
    pub id: u64,
    pub kind: JobKind,
    pub offline: bool,
    pub version: Option<String>,
    pub target: TargetId,
    pub object_path: String,

    pub progress: u32,
    pub status_errno: i32,
    pub n_cancelled: u32,
    pub pid: Option<Pid>,

    pub reply_at: ReplyAt,
    /// Present until the reply is sent (at readiness for detached jobs, at
    /// exit otherwise).
    pub reply: Option<ReplySender>,
}

impl JobEntry {
    /// Authorization requires distinguishing a targeted update from a
    /// plain one.
    pub fn has_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.is_empty())
    }
}

/// Row handed to `ListJobs` and the job object's properties.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: u64,
    pub kind: JobKind,
    pub offline: bool,
    pub progress: u32,
    pub object_path: String,
    pub has_version: bool,
}

impl From<&JobEntry> for JobInfo {
    fn from(entry: &JobEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            offline: entry.offline,
            progress: entry.progress,
            object_path: entry.object_path.clone(),
            has_version: entry.has_version(),
        }
    }
}

pub(crate) fn signal_name(signo: i32) -> String {
    nix::sys::signal::Signal::try_from(signo)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signo}"))
}
