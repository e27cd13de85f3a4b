// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker invocation: argv construction and process spawning.
//!
//! Every operation runs `systemd-sysupdate` in a child process. Job workers
//! get a piped stdout (collected into memory by the supervision task) and
//! the notify socket path forced into their environment. `run_simple` is
//! the synchronous variant for low-latency, side-effect-free verbs
//! (`components`, `--offline list`).

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use sysupdate_core::JobKind;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker failed: {0}")]
    Failed(String),
    #[error("failed to parse worker output: {0}")]
    BadOutput(String),
}

/// How to invoke the worker, resolved once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_path: PathBuf,
    pub notify_socket: PathBuf,
    pub no_verify: bool,
}

impl WorkerConfig {
    pub fn from_env(notify_socket: PathBuf) -> Self {
        Self {
            worker_path: crate::env::worker_path(),
            notify_socket,
            no_verify: crate::env::no_verify(),
        }
    }
}

/// Build the argument vector for a job worker.
///
/// Layout: `--json=short [--verify=no] [<scope>] [--offline] <verb>
/// [<version>]`. The version slot is mandatory for describe (which runs the
/// `list` verb scoped to one version) and optional for update.
pub fn job_args(
    cfg: &WorkerConfig,
    scope: Option<&str>,
    kind: JobKind,
    offline: bool,
    version: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["--json=short".to_string()];

    if cfg.no_verify {
        args.push("--verify=no".to_string());
    }
    if let Some(scope) = scope {
        args.push(scope.to_string());
    }
    if offline {
        args.push("--offline".to_string());
    }

    match kind {
        JobKind::List => args.push("list".to_string()),
        JobKind::Describe => {
            args.push("list".to_string());
            if let Some(version) = version {
                args.push(version.to_string());
            }
        }
        JobKind::CheckNew => args.push("check-new".to_string()),
        JobKind::Update => {
            args.push("update".to_string());
            if let Some(version) = version.filter(|v| !v.is_empty()) {
                args.push(version.to_string());
            }
        }
        JobKind::Vacuum => args.push("vacuum".to_string()),
    }

    args
}

/// Spawn a job worker.
///
/// stdout is piped for collection, stderr stays on the daemon's, stdin is
/// closed. `NOTIFY_SOCKET` points the worker at our listener, and the
/// daemon's own `SYSTEMD_EXEC_PID` is withheld so children don't inherit a
/// stale value. The child is killed and reaped if its handle is dropped.
pub fn spawn_job_worker(cfg: &WorkerConfig, args: &[String]) -> io::Result<Child> {
    debug!(worker = %cfg.worker_path.display(), ?args, "spawning worker");

    Command::new(&cfg.worker_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .env("NOTIFY_SOCKET", &cfg.notify_socket)
        .env_remove("SYSTEMD_EXEC_PID")
        .kill_on_drop(true)
        .spawn()
}

/// Run the worker to completion and parse its stdout document.
pub async fn run_simple(
    cfg: &WorkerConfig,
    scope: Option<&str>,
    extra: &[&str],
) -> Result<Value, WorkerError> {
    let mut args = vec!["--json=short".to_string()];
    if let Some(scope) = scope {
        args.push(scope.to_string());
    }
    args.extend(extra.iter().map(|s| s.to_string()));

    debug!(worker = %cfg.worker_path.display(), ?args, "running worker");

    let output = Command::new(&cfg.worker_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .env_remove("SYSTEMD_EXEC_PID")
        .kill_on_drop(true)
        .output()
        .await?;

    match serde_json::from_slice(&output.stdout) {
        Ok(v) => Ok(v),
        Err(e) if output.status.success() => Err(WorkerError::BadOutput(e.to_string())),
        Err(_) => Err(WorkerError::Failed(output.status.to_string())),
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
