// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for job kinds and paths.

use super::*;

#[test]
fn object_path_embeds_id_after_underscore() {
    assert_eq!(job_object_path(7), "/org/freedesktop/sysupdate1/job/_7");
    assert!(job_object_path(u64::MAX).ends_with(&format!("_{}", u64::MAX)));
}

#[test]
fn only_update_and_vacuum_are_exclusive() {
    assert!(JobKind::Update.is_exclusive());
    assert!(JobKind::Vacuum.is_exclusive());
    assert!(!JobKind::List.is_exclusive());
    assert!(!JobKind::Describe.is_exclusive());
    assert!(!JobKind::CheckNew.is_exclusive());
}

#[test]
fn kind_strings_match_worker_verbs() {
    assert_eq!(JobKind::CheckNew.as_str(), "check-new");
    assert_eq!(JobKind::List.to_string(), "list");
}
