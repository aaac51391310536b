//! End-to-end integration tests for the navigator-runner crate.
//!
//! These tests cover:
//! - Run lifecycle through the orchestrator (timeout, cancel, exit codes)
//! - Decoder behaviour on realistic event streams
//! - Artifact save and replay of a live run
//! - Settings resolution into launchable configurations

#![cfg(unix)]

use std::time::{Duration, Instant};

use navigator_core::{EventPayload, LineOrigin, RunStatus, TaskOutcome};
use navigator_runner::settings::{Settings, SettingsOverrides};
use navigator_runner::{EventDecoder, Orchestrator, RunConfiguration, artifact};

fn sh(script: &str) -> RunConfiguration {
    RunConfiguration::new("/bin/sh").with_args(["-c", script])
}

/// Zombies count as dead: an orphan may not be reaped promptly.
fn pid_alive(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

// ============================================================
// Run Lifecycle Tests
// ============================================================

#[tokio::test]
async fn test_timeout_terminates_sleeping_command() {
    let grace = Duration::from_millis(500);
    let config = RunConfiguration::new("sleep")
        .with_args(["10"])
        .with_timeout(Duration::from_millis(200))
        .with_grace_period(grace);

    let started = Instant::now();
    let mut handle = Orchestrator::new().start(config);
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;

    assert_eq!(result.status(), RunStatus::TimedOut);
    assert!(!handle.is_process_alive());
    assert!(started.elapsed() < Duration::from_millis(200) + grace + Duration::from_secs(2));
}

#[tokio::test]
async fn test_timeout_kills_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = format!(
        "trap '' INT; sleep 30 & echo $! > {}; wait",
        pid_file.display()
    );
    let config = sh(&script)
        .with_timeout(Duration::from_millis(300))
        .with_grace_period(Duration::from_millis(200));

    let mut handle = Orchestrator::new().start(config);
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;
    assert_eq!(result.status(), RunStatus::TimedOut);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pid_alive(pid.trim()), "background child survived the run");
}

#[tokio::test]
async fn test_completed_run_tears_down_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = format!("sleep 30 & echo $! > {}; exit 0", pid_file.display());
    let config = sh(&script).with_grace_period(Duration::from_millis(500));

    let mut handle = Orchestrator::new()
        .with_drain_timeout(Duration::from_millis(300))
        .start(config);
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;
    assert_eq!(result.status(), RunStatus::Completed);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pid_alive(pid.trim()), "background child outlived a completed run");
}

#[tokio::test]
async fn test_cancel_twice_equals_cancel_once() {
    let config = RunConfiguration::new("sleep")
        .with_args(["10"])
        .with_grace_period(Duration::from_millis(500));
    let mut handle = Orchestrator::new().start(config);
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.cancel();
    handle.cancel();
    let result = handle.await_completion(Some(Duration::from_secs(5))).await;
    assert_eq!(result.status(), RunStatus::Canceled);

    handle.cancel();
    assert_eq!(handle.result().status(), RunStatus::Canceled);
    assert!(!handle.is_process_alive());
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let mut handle = Orchestrator::new().start(sh("echo done"));
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;
    assert_eq!(result.status(), RunStatus::Completed);

    handle.cancel();
    assert_eq!(handle.result().status(), RunStatus::Completed);
    assert_eq!(handle.result().len(), 1);
}

#[tokio::test]
async fn test_no_records_after_cancel() {
    let mut handle = Orchestrator::new().start(sh("while true; do echo tick; sleep 0.05; done"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.cancel();
    let count_at_cancel = handle.result().len();
    let result = handle.await_completion(Some(Duration::from_secs(5))).await;

    assert_eq!(result.status(), RunStatus::Canceled);
    assert_eq!(result.len(), count_at_cancel);
}

#[tokio::test]
async fn test_poll_while_running_sees_ordered_records() {
    let mut handle = Orchestrator::new().start(sh("for i in 1 2 3; do echo $i; sleep 0.05; done"));
    let mut seen = Vec::new();
    loop {
        let poll = handle.poll();
        seen.extend(poll.records);
        if poll.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let seqs: Vec<_> = seen.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

// ============================================================
// Event Stream Tests
// ============================================================

#[tokio::test]
async fn test_structured_stream_end_to_end() {
    let script = r#"
printf '{"event":"playbook_on_play_start","event_data":{"play_uuid":"p1","play":"web"}}\n'
printf '{"event":"playbook_on_task_start","event_data":{"task_uuid":"t1","play_uuid":"p1","task":"ping"}}\n'
printf '{"event":"runner_on_ok","event_data":{"task_uuid":"t1","host":"web1","res":{"ping":"pong"}}}\n'
printf '{"event":"runner_on_unreachable","event_data":{"task_uuid":"t1","host":"web2"}}\n'
printf '{"event":"playbook_on_stats","event_data":{"ok":{"web1":1},"dark":{"web2":1}}}\n'
exit 2
"#;
    let mut handle = Orchestrator::new().start(sh(script));
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;

    assert_eq!(result.status(), RunStatus::Failed);
    let records = result.snapshot();
    assert_eq!(records.len(), 5);
    assert!(matches!(records[0].payload, EventPayload::PlayStarted { .. }));
    assert!(matches!(
        records[3].payload,
        EventPayload::TaskResult {
            outcome: TaskOutcome::Unreachable,
            ..
        }
    ));
    assert!(matches!(records[4].payload, EventPayload::RunStats { .. }));
}

#[test]
fn test_split_task_result_yields_one_record() {
    let mut decoder = EventDecoder::new();
    let mut records = decoder.feed(br#"{"event":"ta"#);
    records.extend(decoder.feed(b"sk-result\"}\n"));
    records.extend(decoder.flush());
    assert_eq!(records.len(), 1);
}

// ============================================================
// Artifact Tests
// ============================================================

#[tokio::test]
async fn test_replay_of_live_run_matches() {
    let mut handle = Orchestrator::new().start(sh(
        r#"printf '{"event":"play-start","play_id":"p","name":"x"}\n'; echo plain; echo err >&2"#,
    ));
    let live = handle.await_completion(Some(Duration::from_secs(10))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = artifact::default_artifact_path(dir.path(), "x", chrono::Utc::now());
    artifact::save(&live, &path, Some("x")).unwrap();
    let replayed = artifact::load(&path).unwrap();

    assert_eq!(replayed.snapshot(), live.snapshot());
    assert_eq!(replayed.status(), live.status());
    assert!(replayed.snapshot().iter().any(|r| matches!(
        r.payload,
        EventPayload::RawText {
            origin: LineOrigin::Stderr,
            ..
        }
    )));
}

// ============================================================
// Settings Tests
// ============================================================

#[tokio::test]
async fn test_settings_resolve_direct_run() {
    let mut settings = Settings::default();
    settings
        .apply(SettingsOverrides {
            execution_environment: Some(false),
            set_environment: vec!["NAV_GREETING=hello".into()],
            ..Default::default()
        })
        .unwrap();

    let config = settings
        .resolve("/bin/sh", &["-c".into(), "echo $NAV_GREETING".into()])
        .unwrap();
    let mut handle = Orchestrator::new().start(config);
    let result = handle.await_completion(Some(Duration::from_secs(10))).await;

    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(
        result.snapshot()[0].payload,
        EventPayload::RawText {
            origin: LineOrigin::Stdout,
            line: "hello".into()
        }
    );
}
