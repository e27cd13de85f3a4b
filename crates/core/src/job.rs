// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job kinds and object paths.

use serde::{Deserialize, Serialize};

/// The operation a job runs in its worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    List,
    Describe,
    CheckNew,
    Update,
    Vacuum,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::List => "list",
            JobKind::Describe => "describe",
            JobKind::CheckNew => "check-new",
            JobKind::Update => "update",
            JobKind::Vacuum => "vacuum",
        }
    }

    /// Update and vacuum jobs are mutually exclusive per target.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, JobKind::Update | JobKind::Vacuum)
    }
}

crate::simple_display! {
    JobKind {
        List => "list",
        Describe => "describe",
        CheckNew => "check-new",
        Update => "update",
        Vacuum => "vacuum",
    }
}

/// Object path of the job with the given id.
///
/// The leading underscore keeps the path element valid even though ids
/// are numeric.
pub fn job_object_path(id: u64) -> String {
    format!("{}/job/_{}", crate::MANAGER_PATH, id)
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
