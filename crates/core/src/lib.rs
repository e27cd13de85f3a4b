// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sysupdate-core: shared vocabulary for the sysupdate daemon.
//!
//! Target classes and ids, job kinds and object paths, bus-label escaping,
//! and extraction helpers for the worker's JSON documents.

pub mod macros;

pub mod document;
pub mod flags;
pub mod job;
pub mod label;
pub mod target;

pub use document::{ComponentsOutput, DocumentError};
pub use job::{job_object_path, JobKind};
pub use label::{label_escape, label_unescape};
pub use target::{ImageType, TargetClass, TargetId};

/// Well-known bus name of the daemon.
pub const BUS_NAME: &str = "org.freedesktop.sysupdate1";

/// Root object path of the daemon.
pub const MANAGER_PATH: &str = "/org/freedesktop/sysupdate1";
