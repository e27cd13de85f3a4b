// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the job/target lifecycle engine.

use super::*;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use sysupdate_core::TargetId;
use tempfile::TempDir;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("sysupdate-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn test_engine(
    dir: &TempDir,
    script_body: &str,
) -> (Arc<Engine>, mpsc::UnboundedReceiver<Event>) {
    let cfg = EngineConfig {
        worker: WorkerConfig {
            worker_path: write_script(dir.path(), script_body),
            notify_socket: dir.path().join("notify"),
            no_verify: false,
        },
        image_root: Some(dir.path().join("images")),
    };
    Engine::new(cfg, None)
}

fn host_engine(
    dir: &TempDir,
    script_body: &str,
) -> (Arc<Engine>, mpsc::UnboundedReceiver<Event>) {
    let (engine, events) = test_engine(dir, script_body);
    engine.insert_target(Target::new(TargetId::host(), "sysupdate.d", None));
    (engine, events)
}

async fn wait_finished(events: &mut mpsc::UnboundedReceiver<Event>) -> (u64, Option<i32>) {
    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            Event::JobFinished { id, removal, .. } => return (id, removal),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn job_ids_are_monotonic_and_bounded_by_last_id() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = host_engine(&dir, "echo '{}'");

    for expected in 1..=3u64 {
        let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
        assert_eq!(started.id, expected);
        assert!(started.object_path.ends_with(&format!("_{expected}")));
        assert!(started.id <= engine.last_job_id());
        let _ = timeout(WAIT, started.rx).await.unwrap();
    }
}

#[tokio::test]
async fn unknown_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = test_engine(&dir, "echo '{}'");

    assert!(matches!(
        engine.start_job(JobKind::List, "host", false, None),
        Err(EngineError::UnknownTarget(_))
    ));
}

#[tokio::test]
async fn busy_target_refuses_second_exclusive_job() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = host_engine(&dir, "sleep 2\necho '{}'");

    let update = engine.start_job(JobKind::Update, "host", false, Some(String::new())).unwrap();
    assert!(engine.target("host").unwrap().busy);

    assert!(matches!(
        engine.start_job(JobKind::Vacuum, "host", false, None),
        Err(EngineError::Busy(_))
    ));
    assert!(matches!(
        engine.start_job(JobKind::Update, "host", false, Some(String::new())),
        Err(EngineError::Busy(_))
    ));

    // Read-only verbs may proceed on a busy target.
    let list = engine.start_job(JobKind::List, "host", false, None).unwrap();
    assert_eq!(list.id, update.id + 1);
}

#[tokio::test]
async fn busy_flag_clears_when_exclusive_job_exits() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "echo '{}'");

    let first = engine.start_job(JobKind::Vacuum, "host", false, None).unwrap();
    let _ = timeout(WAIT, first.rx).await.unwrap();
    wait_finished(&mut events).await;

    // Cache was cleared on idle; reinsert and verify the flag is gone.
    engine.insert_target(Target::new(TargetId::host(), "sysupdate.d", None));
    assert!(engine.start_job(JobKind::Vacuum, "host", false, None).is_ok());
}

#[tokio::test]
async fn progress_accepts_100_and_rejects_101() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "sleep 2\necho '{}'");

    let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
    let pid = engine.job_pid(started.id).unwrap();

    engine.inject_status(pid, b"X_SYSUPDATE_PROGRESS=100\n");
    assert_eq!(engine.job_progress(started.id), 100);
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        Event::ProgressChanged { id, .. } => assert_eq!(id, started.id),
        other => panic!("expected ProgressChanged, got {other:?}"),
    }

    engine.inject_status(pid, b"X_SYSUPDATE_PROGRESS=101\n");
    assert_eq!(engine.job_progress(started.id), 100);
}

#[tokio::test]
async fn malformed_errno_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "sleep 2\nexit 1");

    let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
    let pid = engine.job_pid(started.id).unwrap();

    engine.inject_status(pid, b"ERRNO=banana\n");
    engine.inject_status(pid, b"ERRNO=99999\n");
    engine.inject_status(pid, b"ERRNO=5\n");

    // Worker exits 1: the recorded errno wins over the exit code.
    match timeout(WAIT, started.rx).await.unwrap().unwrap() {
        Err(WorkerFailure::Errno { errno }) => assert_eq!(errno, 5),
        other => panic!("expected errno failure, got {other:?}"),
    }
    wait_finished(&mut events).await;
}

#[tokio::test]
async fn status_from_unknown_pid_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = host_engine(&dir, "sleep 2\necho '{}'");

    let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
    engine.inject_status(i32::MAX, b"X_SYSUPDATE_PROGRESS=90\n");
    assert_eq!(engine.job_progress(started.id), 0);
}

#[tokio::test]
async fn ready_detaches_update_jobs_only() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "sleep 2\necho '{}'");

    let list = engine.start_job(JobKind::List, "host", false, None).unwrap();
    let pid = engine.job_pid(list.id).unwrap();
    engine.inject_status(pid, b"READY=1\n");

    // Non-update jobs ride to exit; the reply is the parsed document.
    match timeout(WAIT, list.rx).await.unwrap().unwrap() {
        Ok(JobReply::Document(Some(_))) => {}
        other => panic!("expected document reply, got {other:?}"),
    }
    let (_, removal) = wait_finished(&mut events).await;
    assert_eq!(removal, None);
}

#[tokio::test]
async fn version_then_ready_detaches_with_version() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "sleep 2\necho '{}'");

    let update = engine.start_job(JobKind::Update, "host", false, Some(String::new())).unwrap();
    let pid = engine.job_pid(update.id).unwrap();

    // One datagram carrying both: version must be applied before readiness.
    engine.inject_status(pid, b"X_SYSUPDATE_VERSION=42.1\nREADY=1\n");

    match timeout(WAIT, update.rx).await.unwrap().unwrap() {
        Ok(JobReply::Detached { version }) => assert_eq!(version, "42.1"),
        other => panic!("expected detach, got {other:?}"),
    }

    let (id, removal) = wait_finished(&mut events).await;
    assert_eq!(id, update.id);
    assert_eq!(removal, Some(0));
}

#[tokio::test]
async fn cancel_escalates_after_three_requests() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("trap-ready");
    let script = format!(
        "trap '' TERM\nexec > /dev/null 2>&1\ntouch {}\nsleep 10",
        ready.display()
    );
    let (engine, _events) = host_engine(&dir, &script);

    let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
    // SIGTERM must not land before the worker has installed its trap.
    while !ready.exists() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for expected in 1..=3u32 {
        engine.cancel_job(started.id).unwrap();
        assert_eq!(engine.job_cancel_count(started.id), Some(expected));
    }
    // Worker ignores SIGTERM, so it is still with us.
    assert!(engine.job_pid(started.id).is_some());

    engine.cancel_job(started.id).unwrap();

    match timeout(WAIT, started.rx).await.unwrap().unwrap() {
        Err(WorkerFailure::Signaled { signo, .. }) => {
            assert_eq!(signo, nix::sys::signal::Signal::SIGKILL as i32);
        }
        other => panic!("expected signaled failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = test_engine(&dir, "echo '{}'");
    assert!(matches!(engine.cancel_job(99), Err(EngineError::UnknownJob(99))));
}

#[tokio::test]
async fn last_job_exit_clears_target_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, mut events) = host_engine(&dir, "echo '{}'");

    let started = engine.start_job(JobKind::List, "host", false, None).unwrap();
    let _ = timeout(WAIT, started.rx).await.unwrap();

    wait_finished(&mut events).await;
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        Event::TargetsCleared { object_paths } => {
            assert_eq!(object_paths, vec!["/org/freedesktop/sysupdate1/target/host"]);
        }
        other => panic!("expected TargetsCleared, got {other:?}"),
    }
    assert!(engine.targets().is_empty());
    assert!(engine.is_idle());
}

#[tokio::test]
async fn enumeration_builds_host_and_component_targets() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = test_engine(
        &dir,
        r#"echo '{"default": true, "components": ["kernel", "boot"]}'"#,
    );

    let targets = engine.ensure_targets().await.unwrap();
    let keys: Vec<String> = targets.iter().map(|t| t.id.as_registry_key()).collect();
    assert_eq!(keys, vec!["host", "component:kernel", "component:boot"]);
    assert_eq!(targets[1].path, "sysupdate.kernel.d");
}

#[tokio::test]
async fn enumeration_without_default_omits_host() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) =
        test_engine(&dir, r#"echo '{"default": false, "components": ["kernel"]}'"#);

    let targets = engine.ensure_targets().await.unwrap();
    let keys: Vec<String> = targets.iter().map(|t| t.id.as_registry_key()).collect();
    assert_eq!(keys, vec!["component:kernel"]);
}

#[tokio::test]
async fn enumeration_drops_images_without_default_component() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images/extensions");
    std::fs::create_dir_all(images.join("devtools")).unwrap();

    // Scoped probes (--root=...) report no default component; the host
    // probe reports one.
    let script = r#"case "$*" in
  *--root=*) echo '{"default": false, "components": []}' ;;
  *) echo '{"default": true, "components": []}' ;;
esac"#;
    let (engine, _events) = test_engine(&dir, script);

    let targets = engine.ensure_targets().await.unwrap();
    let keys: Vec<String> = targets.iter().map(|t| t.id.as_registry_key()).collect();
    assert_eq!(keys, vec!["host"]);
}

#[tokio::test]
async fn enumeration_discovers_sysext_images() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images/extensions");
    std::fs::create_dir_all(images.join("devtools")).unwrap();

    let (engine, _events) =
        test_engine(&dir, r#"echo '{"default": true, "components": []}'"#);

    let targets = engine.ensure_targets().await.unwrap();
    let keys: Vec<String> = targets.iter().map(|t| t.id.as_registry_key()).collect();
    assert_eq!(keys, vec!["sysext:devtools", "host"]);
    assert_eq!(targets[0].image_type, Some(ImageType::Directory));
    assert!(targets[0].scope_argument().unwrap().starts_with("--root="));
}

#[tokio::test]
async fn repeated_enumeration_is_cached() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("count");
    let script = format!(
        "echo x >> {}\necho '{{\"default\": true, \"components\": []}}'",
        counter.display()
    );
    let (engine, _events) = test_engine(&dir, &script);

    let first = engine.ensure_targets().await.unwrap();
    let second = engine.ensure_targets().await.unwrap();
    assert_eq!(first.len(), second.len());

    // Only the initial enumeration ran a worker.
    let runs = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(runs.lines().count(), 1);
}
