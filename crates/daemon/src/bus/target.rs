// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-target bus objects.

use std::sync::Arc;

use sysupdate_core::document;
use sysupdate_core::{flags, JobKind, TargetId};
use zbus::message::Header;
use zbus::zvariant::OwnedObjectPath;
use zbus::{fdo, Connection};

use crate::auth;
use crate::engine::{Engine, JobReply, StartedJob, Target};

use super::{engine_error, failure_error, reply_lost, Error, JobIface};

pub struct TargetIface {
    engine: Arc<Engine>,
    id: TargetId,
    path: String,
    key: String,
}

impl TargetIface {
    pub fn new(engine: Arc<Engine>, target: &Target) -> Self {
        Self {
            engine,
            id: target.id.clone(),
            path: target.path.clone(),
            key: target.id.as_registry_key(),
        }
    }

    fn check_flags(flags_arg: u64) -> Result<bool, Error> {
        if flags_arg & !flags::ALL != 0 {
            return Err(fdo::Error::InvalidArgs("Invalid flags specified".to_string()).into());
        }
        Ok(flags_arg & flags::OFFLINE != 0)
    }

    fn one_zero(b: bool) -> &'static str {
        if b {
            "1"
        } else {
            "0"
        }
    }

    /// Expose the freshly started job on the object tree.
    async fn register_job(&self, conn: &Connection, started: &StartedJob) {
        if let Some(info) = self.engine.job_info(started.id) {
            let iface = JobIface::new(Arc::clone(&self.engine), &info);
            if let Err(e) =
                conn.object_server().at(started.object_path.as_str(), iface).await
            {
                tracing::warn!(job = started.id, error = %e, "failed to register job object");
            }
        }
    }

    /// Await a reply-at-exit job and hand back its parsed document.
    async fn finish(started: StartedJob) -> Result<Option<serde_json::Value>, Error> {
        match started.rx.await {
            Ok(Ok(JobReply::Document(doc))) => Ok(doc),
            Ok(Ok(JobReply::Detached { .. })) => {
                Err(fdo::Error::Failed("Unexpected job detach".to_string()).into())
            }
            Ok(Err(failure)) => Err(failure_error(failure)),
            Err(_) => Err(reply_lost()),
        }
    }

    fn required(doc: Option<serde_json::Value>) -> Result<serde_json::Value, Error> {
        doc.ok_or_else(|| fdo::Error::Failed("No output from worker".to_string()).into())
    }
}

#[zbus::interface(name = "org.freedesktop.sysupdate1.Target")]
impl TargetIface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn class(&self) -> String {
        self.id.class().to_string()
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn name(&self) -> String {
        self.id.name().to_string()
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn path(&self) -> String {
        self.path.clone()
    }

    /// List known versions for this target.
    async fn list(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
        flags: u64,
    ) -> Result<Vec<String>, Error> {
        let offline = Self::check_flags(flags)?;

        auth::check(
            conn,
            &header,
            auth::ACTION_CHECK,
            &[
                ("class", self.id.class().as_str()),
                ("name", self.id.name()),
                ("offline", Self::one_zero(offline)),
            ],
        )
        .await?;

        let started = self
            .engine
            .start_job(JobKind::List, &self.key, offline, None)
            .map_err(engine_error)?;
        self.register_job(conn, &started).await;

        let doc = Self::required(Self::finish(started).await?)?;
        document::string_list(&doc, "all")
            .map_err(|e| fdo::Error::Failed(e.to_string()).into())
    }

    /// Describe one version; the reply is the worker's document
    /// re-serialized verbatim.
    async fn describe(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
        version: String,
        flags: u64,
    ) -> Result<String, Error> {
        if version.is_empty() {
            return Err(fdo::Error::InvalidArgs("Version must be specified".to_string()).into());
        }
        let offline = Self::check_flags(flags)?;

        auth::check(
            conn,
            &header,
            auth::ACTION_CHECK,
            &[
                ("class", self.id.class().as_str()),
                ("name", self.id.name()),
                ("version", &version),
                ("offline", Self::one_zero(offline)),
            ],
        )
        .await?;

        let started = self
            .engine
            .start_job(JobKind::Describe, &self.key, offline, Some(version))
            .map_err(engine_error)?;
        self.register_job(conn, &started).await;

        let doc = Self::required(Self::finish(started).await?)?;
        Ok(document::format_compact(&doc))
    }

    /// Check whether an update candidate newer than the installed version
    /// exists; empty reply means none.
    async fn check_new(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<String, Error> {
        auth::check(
            conn,
            &header,
            auth::ACTION_CHECK,
            &[
                ("class", self.id.class().as_str()),
                ("name", self.id.name()),
                ("offline", "0"),
            ],
        )
        .await?;

        let started = self
            .engine
            .start_job(JobKind::CheckNew, &self.key, false, None)
            .map_err(engine_error)?;
        self.register_job(conn, &started).await;

        let doc = Self::required(Self::finish(started).await?)?;
        let available = document::optional_string(&doc, "available")
            .map_err(|e| Error::from(fdo::Error::Failed(e.to_string())))?;
        Ok(available.unwrap_or_default())
    }

    /// Start an update. The reply is sent when the worker signals
    /// readiness; completion arrives later as `JobRemoved`.
    async fn update(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
        version: String,
        flags: u64,
    ) -> Result<(String, u64, OwnedObjectPath), Error> {
        if flags != 0 {
            return Err(fdo::Error::InvalidArgs("Flags must be 0".to_string()).into());
        }

        let action = if version.is_empty() {
            auth::ACTION_UPDATE
        } else {
            auth::ACTION_UPDATE_TO_VERSION
        };
        auth::check(
            conn,
            &header,
            action,
            &[
                ("class", self.id.class().as_str()),
                ("name", self.id.name()),
                ("version", &version),
            ],
        )
        .await?;

        let started = self
            .engine
            .start_job(JobKind::Update, &self.key, false, Some(version))
            .map_err(engine_error)?;
        self.register_job(conn, &started).await;

        let path = OwnedObjectPath::try_from(started.object_path.as_str())
            .map_err(|e| Error::from(fdo::Error::Failed(e.to_string())))?;
        let id = started.id;

        match started.rx.await {
            Ok(Ok(JobReply::Detached { version })) => Ok((version, id, path)),
            Ok(Ok(JobReply::Document(_))) => Err(Error::NoCandidate(
                "Job exited successfully with no work to do, assume already updated".to_string(),
            )),
            Ok(Err(failure)) => Err(failure_error(failure)),
            Err(_) => Err(reply_lost()),
        }
    }

    /// Remove outdated instances; replies with the number removed.
    async fn vacuum(
        &self,
        #[zbus(connection)] conn: &Connection,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<u32, Error> {
        auth::check(
            conn,
            &header,
            auth::ACTION_VACUUM,
            &[("class", self.id.class().as_str()), ("name", self.id.name())],
        )
        .await?;

        let started = self
            .engine
            .start_job(JobKind::Vacuum, &self.key, false, None)
            .map_err(engine_error)?;
        self.register_job(conn, &started).await;

        let doc = Self::required(Self::finish(started).await?)?;
        let removed = document::unsigned(&doc, "removed")
            .map_err(|e| Error::from(fdo::Error::Failed(e.to_string())))?;
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    /// AppStream catalog URLs for this target (offline query).
    async fn get_app_stream(&self) -> Result<Vec<String>, Error> {
        self.engine.target_appstream(&self.key).await.map_err(engine_error)
    }

    /// Currently installed version, empty if none (offline query).
    async fn get_version(&self) -> Result<String, Error> {
        self.engine.target_version(&self.key).await.map_err(engine_error)
    }
}
