// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The D-Bus surface: object tree, signal plumbing, error mapping.

mod job;
mod manager;
mod target;

pub use job::JobIface;
pub use manager::ManagerIface;
pub use target::TargetIface;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use zbus::{fdo, Connection};

use crate::engine::{Engine, EngineError, Event, Target, WorkerFailure};

/// Bus-level error type for the daemon's interfaces.
///
/// Standard failures travel as `org.freedesktop.DBus.Error.*` through the
/// wrapped zbus error; `NoCandidate` is the one distinguished name clients
/// match on.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.freedesktop.sysupdate1")]
pub enum Error {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// The update worker exited successfully before doing any work.
    NoCandidate(String),
}

impl From<fdo::Error> for Error {
    fn from(e: fdo::Error) -> Self {
        Error::ZBus(e.into())
    }
}

pub(crate) fn engine_error(e: EngineError) -> Error {
    let fdo_err = match e {
        EngineError::UnknownTarget(_) | EngineError::UnknownJob(_) => {
            fdo::Error::UnknownObject(e.to_string())
        }
        _ => fdo::Error::Failed(e.to_string()),
    };
    fdo_err.into()
}

pub(crate) fn failure_error(f: WorkerFailure) -> Error {
    fdo::Error::Failed(f.to_string()).into()
}

/// Error used when the engine goes away mid-call (daemon shutdown).
pub(crate) fn reply_lost() -> Error {
    fdo::Error::Failed("Job abandoned during daemon shutdown".to_string()).into()
}

/// Register bus objects for freshly enumerated targets.
pub(crate) async fn register_targets(
    conn: &Connection,
    engine: &Arc<Engine>,
    targets: &[Target],
) -> zbus::Result<()> {
    for target in targets {
        let iface = TargetIface::new(Arc::clone(engine), target);
        conn.object_server().at(target.id.object_path().as_str(), iface).await?;
    }
    Ok(())
}

/// Forward engine events onto the bus until shutdown.
///
/// Signal emission failures are logged and never fatal: a broken client or
/// a bus hiccup must not take the daemon down.
pub fn spawn_event_forwarder(
    conn: Connection,
    mut events: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = forward_event(&conn, event).await {
                        warn!(error = %e, "failed to mirror engine event onto the bus");
                    }
                }
            }
        }
    })
}

async fn forward_event(conn: &Connection, event: Event) -> zbus::Result<()> {
    match event {
        Event::ProgressChanged { object_path, .. } => {
            let iface =
                conn.object_server().interface::<_, JobIface>(object_path.as_str()).await?;
            iface.get().await.progress_changed(iface.signal_context()).await?;
        }
        Event::JobFinished { id, object_path, removal } => {
            if let Some(status) = removal {
                manager::emit_job_removed(conn, id, object_path.as_str(), status).await?;
            }
            conn.object_server().remove::<JobIface, _>(object_path.as_str()).await?;
        }
        Event::TargetsCleared { object_paths } => {
            for path in object_paths {
                conn.object_server().remove::<TargetIface, _>(path.as_str()).await?;
            }
        }
    }
    Ok(())
}
