// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job/target lifecycle engine.
//!
//! Owns both registries: lazily enumerated update targets and the id-keyed
//! table of in-flight jobs. Jobs are worker processes supervised by a task
//! each; their notify datagrams and exit statuses funnel back in here, and
//! everything the bus layer must act on (progress changes, job removal,
//! cache invalidation) leaves through the event channel.

mod job;

pub use job::{JobInfo, JobReply, ReplyAt, WorkerFailure};
pub(crate) use job::{JobEntry, ReplySender};

use std::collections::HashMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use indexmap::IndexMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::Value;
use sysupdate_core::document::{self, ComponentsOutput, DocumentError};
use sysupdate_core::{job_object_path, ImageType, JobKind, TargetClass, TargetId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery;
use crate::notify::{self, Datagram, NotifySocket, StatusUpdate};
use crate::worker::{self, WorkerConfig, WorkerError};

/// Highest errno value accepted from a worker's `ERRNO=` notification.
const ERRNO_MAX: i32 = 4095;

/// Engine configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker: WorkerConfig,
    /// Override of the `/var/lib` image discovery prefix (tests).
    pub image_root: Option<PathBuf>,
}

/// State changes the bus layer must mirror.
#[derive(Debug)]
pub enum Event {
    /// A job's progress percentage changed; emit the property change.
    ProgressChanged { id: u64, object_path: String },
    /// A job left the registry. `removal` carries the `JobRemoved` status
    /// for jobs that reply at readiness; `None` means no signal is due.
    JobFinished { id: u64, object_path: String, removal: Option<i32> },
    /// The idle daemon dropped its target cache; deregister the objects.
    TargetsCleared { object_paths: Vec<String> },
}

/// One registry entry: an addressable update scope.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub path: String,
    pub image_type: Option<ImageType>,
    pub busy: bool,
}

impl Target {
    pub fn new(id: TargetId, path: impl Into<String>, image_type: Option<ImageType>) -> Self {
        Self { id, path: path.into(), image_type, busy: false }
    }

    /// The argv fragment scoping the worker to this target, `None` for the
    /// host.
    pub fn scope_argument(&self) -> Option<String> {
        match self.id.class() {
            TargetClass::Host => None,
            TargetClass::Component => Some(format!("--component={}", self.id.name())),
            _ => {
                let tree = self.image_type.map(|t| t.is_tree()).unwrap_or(true);
                if tree {
                    Some(format!("--root={}", self.path))
                } else {
                    Some(format!("--image={}", self.path))
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Target {0} busy, refusing job")]
    Busy(String),
    #[error("Unknown target {0}")]
    UnknownTarget(String),
    #[error("Unknown job {0}")]
    UnknownJob(u64),
    #[error("Failed to start job: {0}")]
    Spawn(io::Error),
    #[error("Failed to signal worker: {0}")]
    Kill(nix::Error),
    #[error("Failed to enumerate images: {0}")]
    Discover(io::Error),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

struct State {
    last_job_id: u64,
    jobs: HashMap<u64, JobEntry>,
    targets: IndexMap<String, Target>,
}

/// Handle returned by [`Engine::start_job`]: identity plus the channel the
/// reply arrives on.
#[derive(Debug)]
pub struct StartedJob {
    pub id: u64,
    pub object_path: String,
    pub rx: oneshot::Receiver<Result<JobReply, WorkerFailure>>,
}

/// Ask the notify listener task to drain the socket, acknowledged when
/// every queued datagram has been dispatched.
type DrainRequest = oneshot::Sender<()>;

pub struct Engine {
    cfg: EngineConfig,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<Event>,
    notify: Option<Arc<NotifySocket>>,
    drain: Mutex<Option<mpsc::UnboundedSender<DrainRequest>>>,
    /// Serializes target enumeration; the registries' mutex is never held
    /// across the worker invocations enumeration needs.
    enumeration: tokio::sync::Mutex<()>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        notify: Option<Arc<NotifySocket>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            cfg,
            state: Mutex::new(State {
                last_job_id: 0,
                jobs: HashMap::new(),
                targets: IndexMap::new(),
            }),
            events,
            notify,
            drain: Mutex::new(None),
            enumeration: tokio::sync::Mutex::new(()),
        });
        (engine, rx)
    }

    /// Run the notify receive loop until shutdown.
    ///
    /// The returned task is the sole consumer of the socket: live datagrams
    /// and the drain pass before each job completion are processed on the
    /// same task, so a worker's final status can never be overtaken by its
    /// exit.
    pub fn spawn_notify_listener(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let sock = Arc::clone(self.notify.as_ref()?);
        let (drain_tx, mut drain_rx) = mpsc::unbounded_channel::<DrainRequest>();
        *self.drain.lock() = Some(drain_tx);

        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = drain_rx.recv() => {
                        let Some(ack) = request else { break };
                        engine.drain_notify();
                        let _ = ack.send(());
                    }
                    result = sock.recv() => match result {
                        Ok(dgram) => engine.dispatch_datagram(&dgram),
                        Err(e) => warn!(error = %e, "notify socket receive failed"),
                    }
                }
            }
        }))
    }

    /// The daemon is idle iff no jobs are outstanding.
    pub fn is_idle(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let state = self.state.lock();
        let mut jobs: Vec<JobInfo> = state.jobs.values().map(JobInfo::from).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn job_info(&self, id: u64) -> Option<JobInfo> {
        self.state.lock().jobs.get(&id).map(JobInfo::from)
    }

    pub fn job_progress(&self, id: u64) -> u32 {
        self.state.lock().jobs.get(&id).map(|j| j.progress).unwrap_or(0)
    }

    /// Snapshot of the target registry without triggering enumeration.
    pub fn targets(&self) -> Vec<Target> {
        self.state.lock().targets.values().cloned().collect()
    }

    pub fn target(&self, key: &str) -> Option<Target> {
        self.state.lock().targets.get(key).cloned()
    }

    // ── Target enumeration ──────────────────────────────────────────────

    /// Return all targets, enumerating first if the registry is empty.
    pub async fn ensure_targets(&self) -> Result<Vec<Target>, EngineError> {
        {
            let state = self.state.lock();
            if !state.targets.is_empty() {
                return Ok(state.targets.values().cloned().collect());
            }
        }

        let _guard = self.enumeration.lock().await;
        {
            let state = self.state.lock();
            if !state.targets.is_empty() {
                return Ok(state.targets.values().cloned().collect());
            }
        }

        let targets = self.enumerate_targets().await?;

        let mut state = self.state.lock();
        for target in targets {
            state.targets.insert(target.id.as_registry_key(), target);
        }
        Ok(state.targets.values().cloned().collect())
    }

    async fn enumerate_targets(&self) -> Result<Vec<Target>, EngineError> {
        let mut targets = Vec::new();

        for class in TargetClass::DISCOVERABLE {
            if let Err(e) = self.enumerate_image_class(class, &mut targets).await {
                warn!(class = %class, error = %e, "failed to enumerate image class, ignoring");
            }
        }

        self.enumerate_components(&mut targets).await?;
        Ok(targets)
    }

    async fn enumerate_image_class(
        &self,
        class: TargetClass,
        out: &mut Vec<Target>,
    ) -> Result<(), EngineError> {
        let dir = discovery::class_root(class, self.cfg.image_root.as_deref());
        let images = discovery::discover_images(class, &dir).map_err(EngineError::Discover)?;

        for image in images {
            let target = Target::new(
                TargetId::new(class, &image.name),
                image.path.display().to_string(),
                Some(image.image_type),
            );

            let doc = worker::run_simple(
                &self.cfg.worker,
                target.scope_argument().as_deref(),
                &["components"],
            )
            .await?;
            let components = ComponentsOutput::from_document(&doc)?;
            if !components.default {
                debug!(path = %target.path, "skipping image without default component");
                continue;
            }

            out.push(target);
        }

        Ok(())
    }

    async fn enumerate_components(&self, out: &mut Vec<Target>) -> Result<(), EngineError> {
        let doc = worker::run_simple(&self.cfg.worker, None, &["components"]).await?;
        let components = ComponentsOutput::from_document(&doc)?;

        if components.default {
            out.push(Target::new(TargetId::host(), "sysupdate.d", None));
        }

        for name in components.components {
            let target = Target::new(
                TargetId::new(TargetClass::Component, &name),
                format!("sysupdate.{name}.d"),
                None,
            );
            out.push(target);
        }

        Ok(())
    }

    // ── Synchronous per-target queries ──────────────────────────────────

    fn scope_argument(&self, target_key: &str) -> Result<Option<String>, EngineError> {
        let state = self.state.lock();
        let target = state
            .targets
            .get(target_key)
            .ok_or_else(|| EngineError::UnknownTarget(target_key.to_string()))?;
        Ok(target.scope_argument())
    }

    pub async fn target_version(&self, target_key: &str) -> Result<String, EngineError> {
        let scope = self.scope_argument(target_key)?;
        let doc = worker::run_simple(&self.cfg.worker, scope.as_deref(), &["--offline", "list"])
            .await?;
        Ok(document::optional_string(&doc, "current")?.unwrap_or_default())
    }

    pub async fn target_appstream(&self, target_key: &str) -> Result<Vec<String>, EngineError> {
        let scope = self.scope_argument(target_key)?;
        let doc = worker::run_simple(&self.cfg.worker, scope.as_deref(), &["--offline", "list"])
            .await?;
        Ok(document::string_list(&doc, "appstream_urls")?)
    }

    /// Union of every target's AppStream URLs, in registry order.
    pub async fn list_appstream(&self) -> Result<Vec<String>, EngineError> {
        let targets = self.ensure_targets().await?;
        let mut urls: Vec<String> = Vec::new();
        for target in targets {
            for url in self.target_appstream(&target.id.as_registry_key()).await? {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        Ok(urls)
    }

    // ── Job lifecycle ───────────────────────────────────────────────────

    /// Create and start a job against `target_key`.
    ///
    /// Ids are allocated monotonically and never reused. Update and vacuum
    /// jobs take the target's busy flag for their lifetime; a second one on
    /// a busy target is refused. The worker is spawned immediately and its
    /// supervision task delivers the reply through `StartedJob::rx`.
    pub fn start_job(
        self: &Arc<Self>,
        kind: JobKind,
        target_key: &str,
        offline: bool,
        version: Option<String>,
    ) -> Result<StartedJob, EngineError> {
        let (id, object_path, args, rx) = {
            let mut state = self.state.lock();
            let target = state
                .targets
                .get(target_key)
                .ok_or_else(|| EngineError::UnknownTarget(target_key.to_string()))?;
            if kind.is_exclusive() && target.busy {
                info!(target_key, kind = %kind, "target busy, refusing job");
                return Err(EngineError::Busy(target.id.name().to_string()));
            }

            let args = worker::job_args(
                &self.cfg.worker,
                target.scope_argument().as_deref(),
                kind,
                offline,
                version.as_deref(),
            );
            let target_id = target.id.clone();

            let id = state.last_job_id + 1;
            let object_path = job_object_path(id);
            let (tx, rx): (ReplySender, _) = oneshot::channel();

            let entry = JobEntry {
                id,
                kind,
                offline,
                version,
                target: target_id,
                object_path: object_path.clone(),
                progress: 0,
                status_errno: 0,
                n_cancelled: 0,
                pid: None,
                reply_at: if kind == JobKind::Update { ReplyAt::Ready } else { ReplyAt::Exit },
                reply: Some(tx),
            };
            state.jobs.insert(id, entry);
            state.last_job_id = id;
            if kind.is_exclusive() {
                if let Some(target) = state.targets.get_mut(target_key) {
                    target.busy = true;
                }
            }

            (id, object_path, args, rx)
        };

        let child = match worker::spawn_job_worker(&self.cfg.worker, &args) {
            Ok(child) => child,
            Err(e) => {
                self.abandon_job(id);
                return Err(EngineError::Spawn(e));
            }
        };

        let pid = child.id().map(|p| Pid::from_raw(p as i32));
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.jobs.get_mut(&id) {
                entry.pid = pid;
            }
        }

        info!(job = id, kind = %kind, pid = ?pid, "started job worker");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = child.wait_with_output().await;
            engine.settle_notify().await;
            engine.complete_job(id, result);
        });

        Ok(StartedJob { id, object_path, rx })
    }

    /// Roll back a job whose worker never spawned.
    fn abandon_job(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.jobs.remove(&id) {
            if entry.kind.is_exclusive() {
                if let Some(target) = state.targets.get_mut(&entry.target.as_registry_key()) {
                    target.busy = false;
                }
            }
        }
    }

    /// Request cancellation: SIGTERM for the first three requests, SIGKILL
    /// from the fourth on. Removal still happens through the exit path.
    pub fn cancel_job(&self, id: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let entry = state.jobs.get_mut(&id).ok_or(EngineError::UnknownJob(id))?;
        let pid = entry.pid.ok_or(EngineError::UnknownJob(id))?;

        let signal = if entry.n_cancelled < 3 { Signal::SIGTERM } else { Signal::SIGKILL };
        kill(pid, signal).map_err(EngineError::Kill)?;
        entry.n_cancelled += 1;

        debug!(job = id, signal = signal.as_str(), cancelled = entry.n_cancelled, "cancel requested");
        Ok(())
    }

    // ── Notifications ───────────────────────────────────────────────────

    /// Route one datagram to the job owning the sending pid.
    pub fn dispatch_datagram(&self, dgram: &Datagram) {
        if dgram.truncated {
            warn!("got overly long notification datagram, ignoring");
            return;
        }
        let Some(pid) = dgram.pid.filter(|p| *p > 0) else {
            warn!("got notification datagram lacking credential information, ignoring");
            return;
        };

        self.dispatch_status(pid, notify::parse_status(&dgram.data));
    }

    fn dispatch_status(&self, pid: i32, status: StatusUpdate) {
        let mut state = self.state.lock();
        let Some(entry) =
            state.jobs.values_mut().find(|j| j.pid.map(Pid::as_raw) == Some(pid))
        else {
            warn!(pid, "got notification datagram from unexpected peer, ignoring");
            return;
        };

        if let Some(version) = status.version {
            debug!(job = entry.id, version = %version, "got version from job");
            entry.version = Some(version);
        }

        if let Some(progress) = status.progress {
            match progress.parse::<u32>() {
                Ok(percent) if percent <= 100 => {
                    entry.progress = percent;
                    debug!(job = entry.id, percent, "got percentage from job");
                    let _ = self.events.send(Event::ProgressChanged {
                        id: entry.id,
                        object_path: entry.object_path.clone(),
                    });
                }
                _ => warn!(job = entry.id, "got invalid percent value, ignoring"),
            }
        }

        if let Some(errno) = status.errno {
            match errno.parse::<i32>() {
                Ok(errno) if (0..=ERRNO_MAX).contains(&errno) => {
                    debug!(job = entry.id, errno, "got errno from job");
                    entry.status_errno = errno;
                }
                _ => warn!(job = entry.id, "got invalid errno value, ignoring"),
            }
        }

        // Last: detaching consumes the reply channel.
        if status.ready {
            self.on_ready(entry);
        }
    }

    fn on_ready(&self, entry: &mut JobEntry) {
        if entry.reply_at != ReplyAt::Ready {
            return;
        }
        let Some(tx) = entry.reply.take() else { return };

        debug!(job = entry.id, "got READY=1 from job, detaching");
        let version = entry.version.clone().unwrap_or_default();
        if tx.send(Ok(JobReply::Detached { version })).is_err() {
            warn!(job = entry.id, "failed to detach job, caller gone");
        }
    }

    /// Flush pending worker notifications before a job completion is
    /// processed.
    ///
    /// The kernel queues a worker's datagrams before its exit becomes
    /// observable; routing the drain through the listener task also orders
    /// it after anything that task already dequeued.
    async fn settle_notify(&self) {
        let drain = self.drain.lock().clone();
        if let Some(drain) = drain {
            let (ack_tx, ack_rx) = oneshot::channel();
            if drain.send(ack_tx).is_ok() {
                let _ = ack_rx.await;
                return;
            }
        }
        self.drain_notify();
    }

    /// Pull everything already queued on the notify socket.
    fn drain_notify(&self) {
        let Some(sock) = &self.notify else { return };
        loop {
            match sock.try_recv() {
                Ok(Some(dgram)) => self.dispatch_datagram(&dgram),
                Ok(None) => return,
                Err(e) => {
                    debug!(error = %e, "failed to drain notify socket");
                    return;
                }
            }
        }
    }

    // ── Completion ──────────────────────────────────────────────────────

    fn complete_job(&self, id: u64, result: io::Result<Output>) {
        let (entry, cleared) = {
            let mut state = self.state.lock();
            let Some(entry) = state.jobs.remove(&id) else { return };

            if entry.kind.is_exclusive() {
                if let Some(target) = state.targets.get_mut(&entry.target.as_registry_key()) {
                    target.busy = false;
                }
            }

            // Idle: release the target cache before anyone can observe it.
            let cleared = if state.jobs.is_empty() && !state.targets.is_empty() {
                let paths = state.targets.values().map(|t| t.id.object_path()).collect();
                state.targets.clear();
                debug!("cleared target cache");
                Some(paths)
            } else {
                None
            };

            (entry, cleared)
        };

        let mut entry = entry;
        let (exit_code, signo, outcome) = judge_exit(&entry, result);

        let removal = matches!(entry.reply_at, ReplyAt::Ready).then(|| {
            if entry.status_errno != 0 {
                -entry.status_errno
            } else if let Some(signo) = signo {
                -signo
            } else {
                exit_code
            }
        });

        match entry.reply.take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(job = id, "job completed after caller went away");
                }
            }
            None => {
                if let Err(failure) = &outcome {
                    warn!(job = id, error = %failure, "detached job failed");
                }
            }
        }

        info!(job = id, status = removal.unwrap_or(exit_code), "job exited");
        let _ = self.events.send(Event::JobFinished {
            id,
            object_path: entry.object_path,
            removal,
        });

        if let Some(object_paths) = cleared {
            let _ = self.events.send(Event::TargetsCleared { object_paths });
        }
    }
}

/// Translate a worker's exit into the reply outcome.
///
/// Returns `(exit_code, killing_signal, outcome)`.
fn judge_exit(
    entry: &JobEntry,
    result: io::Result<Output>,
) -> (i32, Option<i32>, Result<JobReply, WorkerFailure>) {
    let output = match result {
        Ok(output) => output,
        Err(e) => return (-1, None, Err(WorkerFailure::Wait(e))),
    };

    if let Some(signo) = output.status.signal() {
        let failure = WorkerFailure::Signaled { signo, name: job::signal_name(signo) };
        return (-1, Some(signo), Err(failure));
    }

    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        let failure = if entry.status_errno != 0 {
            WorkerFailure::Errno { errno: entry.status_errno }
        } else {
            WorkerFailure::Exited { code }
        };
        return (code, None, Err(failure));
    }

    if output.stdout.is_empty() {
        warn!(job = entry.id, "no output from child job, ignoring");
        return (0, None, Ok(JobReply::Document(None)));
    }

    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(doc) => (0, None, Ok(JobReply::Document(Some(doc)))),
        Err(e) => (0, None, Err(WorkerFailure::BadOutput(e.to_string()))),
    }
}

// Probes used by workspace integration tests.
#[cfg(any(test, feature = "test-support"))]
impl Engine {
    pub fn insert_target(&self, target: Target) {
        let mut state = self.state.lock();
        state.targets.insert(target.id.as_registry_key(), target);
    }

    pub fn job_pid(&self, id: u64) -> Option<i32> {
        self.state.lock().jobs.get(&id).and_then(|j| j.pid).map(Pid::as_raw)
    }

    pub fn job_cancel_count(&self, id: u64) -> Option<u32> {
        self.state.lock().jobs.get(&id).map(|j| j.n_cancelled)
    }

    pub fn last_job_id(&self) -> u64 {
        self.state.lock().last_job_id
    }

    pub fn inject_status(&self, pid: i32, data: &[u8]) {
        self.dispatch_status(pid, notify::parse_status(data));
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
