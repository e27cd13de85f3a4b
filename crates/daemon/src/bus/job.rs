// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job bus objects.

use std::sync::Arc;

use sysupdate_core::JobKind;
use zbus::message::Header;
use zbus::Connection;

use crate::auth;
use crate::engine::{Engine, JobInfo};

use super::{engine_error, Error};

pub struct JobIface {
    engine: Arc<Engine>,
    id: u64,
    kind: JobKind,
    offline: bool,
}

impl JobIface {
    pub fn new(engine: Arc<Engine>, info: &JobInfo) -> Self {
        Self { engine, id: info.id, kind: info.kind, offline: info.offline }
    }
}

#[zbus::interface(name = "org.freedesktop.sysupdate1.Job")]
impl JobIface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn id(&self) -> u64 {
        self.id
    }

    #[zbus(property(emits_changed_signal = "const"), name = "Type")]
    fn kind(&self) -> String {
        self.kind.to_string()
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn offline(&self) -> bool {
        self.offline
    }

    #[zbus(property)]
    fn progress(&self) -> u32 {
        self.engine.job_progress(self.id)
    }

    /// Ask the worker to stop: SIGTERM for the first three requests,
    /// SIGKILL afterwards. The job still leaves through its exit path.
    async fn cancel(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        let action = match self.kind {
            JobKind::List | JobKind::Describe | JobKind::CheckNew => auth::ACTION_CHECK,
            JobKind::Update => {
                if self.engine.job_info(self.id).is_some_and(|info| info.has_version) {
                    auth::ACTION_UPDATE_TO_VERSION
                } else {
                    auth::ACTION_UPDATE
                }
            }
            JobKind::Vacuum => auth::ACTION_VACUUM,
        };

        auth::check(conn, &header, action, &[]).await?;

        self.engine.cancel_job(self.id).map_err(engine_error)
    }
}
