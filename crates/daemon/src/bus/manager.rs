// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The root `Manager` interface.

use std::sync::Arc;

use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::{fdo, Connection, SignalContext};

use crate::engine::Engine;

use super::{engine_error, register_targets, Error};

pub struct ManagerIface {
    engine: Arc<Engine>,
}

impl ManagerIface {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Emit `JobRemoved` from the root object.
pub(crate) async fn emit_job_removed(
    conn: &Connection,
    id: u64,
    path: &str,
    status: i32,
) -> zbus::Result<()> {
    let ctxt = SignalContext::new(conn, sysupdate_core::MANAGER_PATH)?;
    let path = ObjectPath::try_from(path)?;
    ManagerIface::job_removed(&ctxt, id, path, status).await
}

#[zbus::interface(name = "org.freedesktop.sysupdate1.Manager")]
impl ManagerIface {
    /// Enumerate update targets as `(class, name, object_path)` rows.
    async fn list_targets(
        &self,
        #[zbus(connection)] conn: &Connection,
    ) -> Result<Vec<(String, String, OwnedObjectPath)>, Error> {
        let targets = self.engine.ensure_targets().await.map_err(engine_error)?;
        register_targets(conn, &self.engine, &targets).await?;

        targets
            .iter()
            .map(|t| {
                let path = OwnedObjectPath::try_from(t.id.object_path())
                    .map_err(|e| Error::from(fdo::Error::Failed(e.to_string())))?;
                Ok((t.id.class().to_string(), t.id.name().to_string(), path))
            })
            .collect()
    }

    /// Enumerate jobs as `(id, type, progress, object_path)` rows.
    async fn list_jobs(&self) -> Result<Vec<(u64, String, u32, OwnedObjectPath)>, Error> {
        self.engine
            .jobs()
            .into_iter()
            .map(|j| {
                let path = OwnedObjectPath::try_from(j.object_path.as_str())
                    .map_err(|e| Error::from(fdo::Error::Failed(e.to_string())))?;
                Ok((j.id, j.kind.to_string(), j.progress, path))
            })
            .collect()
    }

    /// Union of all targets' AppStream catalog URLs.
    async fn list_appstream(
        &self,
        #[zbus(connection)] conn: &Connection,
    ) -> Result<Vec<String>, Error> {
        let targets = self.engine.ensure_targets().await.map_err(engine_error)?;
        register_targets(conn, &self.engine, &targets).await?;

        self.engine.list_appstream().await.map_err(engine_error)
    }

    /// Emitted when a detached job leaves the registry. `status` is the
    /// exit code, the negated worker-reported errno, or the negated signal
    /// number.
    #[zbus(signal)]
    async fn job_removed(
        ctxt: &SignalContext<'_>,
        id: u64,
        path: ObjectPath<'_>,
        status: i32,
    ) -> zbus::Result<()>;
}
