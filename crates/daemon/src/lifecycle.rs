// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup order, idle-exit loop, shutdown.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysupdate_core::{BUS_NAME, MANAGER_PATH};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{self, ManagerIface};
use crate::engine::{Engine, EngineConfig};
use crate::env;
use crate::notify::NotifySocket;
use crate::worker::WorkerConfig;

/// How long the daemon stays around after the last job exits.
const DEFAULT_EXIT_IDLE: Duration = Duration::from_secs(30);

/// Cadence of the idle check.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker binary to invoke for every operation.
    pub worker_path: PathBuf,
    /// Pass `--verify=no` to workers (testing).
    pub no_verify: bool,
    /// Path of the worker notification socket.
    pub notify_socket: PathBuf,
    /// Override of the `/var/lib` image discovery prefix.
    pub image_root: Option<PathBuf>,
    /// Idle grace period before exit.
    pub exit_idle: Duration,
}

impl Config {
    /// Resolve configuration from the environment.
    pub fn load() -> Self {
        Self {
            worker_path: env::worker_path(),
            no_verify: env::no_verify(),
            notify_socket: PathBuf::from(env::NOTIFY_SOCKET_PATH),
            image_root: None,
            exit_idle: DEFAULT_EXIT_IDLE,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to bind notify socket at {0}: {1}")]
    Bind(PathBuf, io::Error),
    #[error("Failed to set up bus connection: {0}")]
    Bus(#[from] zbus::Error),
    #[error("Failed to install signal handler: {0}")]
    Signals(io::Error),
}

/// Run the daemon to completion.
///
/// Startup order matters: the notify socket must exist before the first
/// worker can be spawned, and the manager object must be served before the
/// well-known name is requested, so clients never see the name without the
/// API behind it.
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    let notify = Arc::new(
        NotifySocket::bind(&config.notify_socket)
            .map_err(|e| LifecycleError::Bind(config.notify_socket.clone(), e))?,
    );

    let engine_config = EngineConfig {
        worker: WorkerConfig {
            worker_path: config.worker_path.clone(),
            notify_socket: config.notify_socket.clone(),
            no_verify: config.no_verify,
        },
        image_root: config.image_root.clone(),
    };
    let (engine, events) = Engine::new(engine_config, Some(Arc::clone(&notify)));

    let conn = zbus::connection::Builder::system()?
        .serve_at(MANAGER_PATH, ManagerIface::new(Arc::clone(&engine)))?
        .name(BUS_NAME)?
        .build()
        .await?;

    let shutdown = CancellationToken::new();
    let forwarder = bus::spawn_event_forwarder(conn.clone(), events, shutdown.clone());
    let listener = engine.spawn_notify_listener(shutdown.clone());
    let watchdog = spawn_watchdog(shutdown.clone());
    spawn_debug_dump(Arc::clone(&engine)).map_err(LifecycleError::Signals)?;

    sd_notify("READY=1");
    info!(name = BUS_NAME, "daemon running");

    idle_loop(&engine, config.exit_idle).await?;

    sd_notify("STOPPING=1");
    shutdown.cancel();
    if let Err(e) = conn.release_name(BUS_NAME).await {
        debug!(error = %e, "failed to release bus name");
    }

    if let Some(listener) = listener {
        let _ = listener.await;
    }
    let _ = forwarder.await;
    if let Some(watchdog) = watchdog {
        let _ = watchdog.await;
    }

    Ok(())
}

/// Block until a termination signal arrives or the daemon has been idle
/// for the grace period.
async fn idle_loop(engine: &Engine, exit_idle: Duration) -> Result<(), LifecycleError> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(LifecycleError::Signals)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(LifecycleError::Signals)?;

    let mut tick = tokio::time::interval(IDLE_CHECK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut idle_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("received SIGINT, exiting");
                return Ok(());
            }
            _ = tick.tick() => {
                if !engine.is_idle() {
                    idle_since = None;
                    continue;
                }
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= exit_idle {
                    info!("idle, exiting");
                    return Ok(());
                }
            }
        }
    }
}

/// Tell the service manager about our state, if it is listening.
fn sd_notify(state: &str) {
    let Some(path) = env::sd_notify_socket() else { return };
    if path.starts_with('@') {
        debug!("abstract notify socket not supported, skipping notification");
        return;
    }
    let Ok(sock) = std::os::unix::net::UnixDatagram::unbound() else { return };
    if let Err(e) = sock.send_to(state.as_bytes(), &path) {
        debug!(error = %e, "failed to notify service manager");
    }
}

fn spawn_watchdog(shutdown: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
    let interval = env::watchdog_interval()?;
    Some(tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => sd_notify("WATCHDOG=1"),
            }
        }
    }))
}

/// `SIGRTMIN+18` logs a dump of the registries, mirroring the common
/// debug-dump convention of the service manager's daemons.
fn spawn_debug_dump(engine: Arc<Engine>) -> io::Result<()> {
    let kind = SignalKind::from_raw(nix::libc::SIGRTMIN() + 18);
    let mut dump = signal(kind)?;
    tokio::spawn(async move {
        while dump.recv().await.is_some() {
            let jobs = engine.jobs();
            let targets = engine.targets();
            info!(jobs = jobs.len(), targets = targets.len(), "state dump requested");
            for job in jobs {
                info!(
                    id = job.id,
                    kind = %job.kind,
                    offline = job.offline,
                    progress = job.progress,
                    "job"
                );
            }
            for target in targets {
                info!(id = %target.id, path = %target.path, busy = target.busy, "target");
            }
        }
    });
    Ok(())
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
