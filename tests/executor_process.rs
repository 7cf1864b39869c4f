#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gradewatch::config::ExecutorSettings;
use gradewatch::exec::{ExecutorBackend, JobKind, JobSpec, ProcessExecutor};
use gradewatch::types::{ExitSignal, SyncStatus};

fn executor(max_concurrent: usize) -> ProcessExecutor {
    ProcessExecutor::new(
        &ExecutorSettings {
            max_concurrent,
            kill_grace: Duration::from_millis(200),
            max_output_bytes: 4096,
        },
        false,
    )
}

fn shell(command: &str, dir: &std::path::Path, timeout: Duration) -> JobSpec {
    JobSpec::shell(JobKind::Other, command, dir, timeout)
}

#[tokio::test]
async fn captures_output_of_successful_job() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(2);

    let outcome = exec
        .run(shell("echo 'Already up to date.'; echo warn >&2", dir.path(), Duration::from_secs(5)))
        .await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.exit_signal, ExitSignal::Normal);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.stdout.trim(), "Already up to date.");
    assert_eq!(outcome.stderr.trim(), "warn");
    assert_eq!(outcome.sync_status(), SyncStatus::Success);
}

#[tokio::test]
async fn non_zero_exit_is_a_normal_failure() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(1)
        .run(shell("echo 'fatal: repository not found' >&2; exit 128", dir.path(), Duration::from_secs(5)))
        .await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.exit_signal, ExitSignal::Normal);
    assert_eq!(outcome.exit_code, Some(128));
    assert!(outcome.stderr.contains("repository not found"));
    assert_eq!(outcome.sync_status(), SyncStatus::Failed);
}

#[tokio::test]
async fn missing_program_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let job = JobSpec::program(
        JobKind::Other,
        "gradewatch-no-such-program",
        vec![],
        dir.path(),
        Duration::from_secs(5),
    );

    let outcome = executor(1).run(job).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.exit_signal, ExitSignal::Normal);
    assert_eq!(outcome.exit_code, None);
    assert!(outcome.stderr.contains("gradewatch-no-such-program"), "{}", outcome.stderr);
    assert_eq!(outcome.sync_status(), SyncStatus::Errored);
}

#[tokio::test]
async fn missing_working_dir_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(1)
        .run(shell("true", &dir.path().join("gone"), Duration::from_secs(5)))
        .await;
    assert!(!outcome.succeeded);
    assert!(outcome.stderr.contains("does not exist"));
}

#[tokio::test]
async fn timeout_is_reported_and_slot_released() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(1);

    let started = Instant::now();
    let outcome = exec
        .run(shell("sleep 10", dir.path(), Duration::from_millis(300)))
        .await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.exit_signal, ExitSignal::Timeout);
    assert_eq!(outcome.sync_status(), SyncStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(exec.in_flight(), 0);

    // The single slot is free again.
    let next = common::with_timeout(exec.run(shell("true", dir.path(), Duration::from_secs(5)))).await;
    assert!(next.succeeded);
}

#[tokio::test]
async fn process_ignoring_sigterm_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let outcome = executor(1)
        .run(shell("trap '' TERM; sleep 10", dir.path(), Duration::from_millis(300)))
        .await;

    assert_eq!(outcome.exit_signal, ExitSignal::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn output_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(1)
        .run(shell("head -c 100000 /dev/zero | tr '\\0' 'x'", dir.path(), Duration::from_secs(5)))
        .await;

    assert!(outcome.succeeded);
    assert!(outcome.truncated);
    assert_eq!(outcome.stdout.len(), 4096);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_max_concurrent_processes() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let exec = Arc::new(executor(2));

    // Each job registers itself, records how many jobs are registered, then
    // lingers before leaving.
    let probe = "touch running.$$; ls | grep -c '^running' >> overlap; sleep 0.3; rm running.$$";

    let mut handles = Vec::new();
    for _ in 0..6 {
        let exec = Arc::clone(&exec);
        let job = shell(probe, dir.path(), Duration::from_secs(10));
        handles.push(tokio::spawn(async move { exec.run(job).await }));
    }
    for h in handles {
        assert!(h.await.unwrap().succeeded);
    }

    let overlap = std::fs::read_to_string(dir.path().join("overlap")).unwrap();
    let counts: Vec<usize> = overlap.lines().map(|l| l.trim().parse().unwrap()).collect();
    assert_eq!(counts.len(), 6);
    assert!(counts.iter().all(|&c| (1..=2).contains(&c)), "{counts:?}");
    assert_eq!(exec.in_flight(), 0);
}
