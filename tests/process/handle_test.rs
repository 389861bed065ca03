//! Coverage for child spawn, environment injection and graceful stop.

use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use rotenv::credential::{Attributes, Credential, SymmetricKey, ValidityWindow};
use rotenv::process::{CommandSpec, ProcessHandle, StartError, StopOutcome};

fn credential(key: &str, secret: &str) -> Box<dyn Credential> {
    let attributes: Attributes = match json!({"key": key, "secret": secret}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let window = ValidityWindow::new(chrono::Utc::now(), Duration::from_secs(15));
    Box::new(SymmetricKey::build(&attributes, &window).expect("valid credential"))
}

fn sh(script: &str, out: &Path) -> CommandSpec {
    CommandSpec::new(
        "sh",
        vec![
            "-c".to_owned(),
            script.to_owned(),
            "rotenv-test".to_owned(),
            out.display().to_string(),
        ],
    )
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if contents.ends_with('\n') {
                return contents;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", path.display());
}

#[tokio::test]
async fn child_sees_credential_and_inherited_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("env.txt");

    let mut handle = ProcessHandle::start(
        &sh(r#"echo "$KEY|$SECRET|${PATH:+inherited}" > "$1""#, &out),
        credential("A", "B"),
    )
    .expect("should start");

    assert_eq!(handle.wait_exit().await, 0);
    assert_eq!(wait_for_file(&out).await, "A|B|inherited\n");
}

#[tokio::test]
async fn credential_overrides_inherited_variable() {
    // Every child in this harness gets KEY from its credential.
    std::env::set_var("KEY", "from-parent");

    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("env.txt");

    let mut handle = ProcessHandle::start(&sh(r#"echo "$KEY" > "$1""#, &out), credential("A", "B"))
        .expect("should start");

    assert_eq!(handle.wait_exit().await, 0);
    assert_eq!(wait_for_file(&out).await, "A\n");
}

#[tokio::test]
async fn natural_exit_code_is_reported_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut handle = ProcessHandle::start(&sh("exit 3", dir.path()), credential("A", "B"))
        .expect("should start");

    assert_eq!(handle.wait_exit().await, 3);
    assert!(!handle.is_alive());
    assert_eq!(handle.exit_code(), Some(3));
    assert_eq!(handle.wait_exit().await, 3);
}

#[tokio::test]
async fn handle_keeps_its_credential() {
    let command = CommandSpec::new("sleep", vec!["30".to_owned()]);
    let mut handle = ProcessHandle::start(&command, credential("A", "B")).expect("should start");

    assert!(handle.is_alive());
    assert!(handle.pid().is_some());
    assert_eq!(handle.credential().variant(), "symmetric");
    let later = handle.started_at() + chrono::Duration::seconds(7);
    assert_eq!(handle.uptime_secs(later), 7);
    let earlier = handle.started_at() - chrono::Duration::seconds(7);
    assert_eq!(handle.uptime_secs(earlier), 0);
    assert!(handle
        .credential()
        .same_as(credential("A", "B").as_ref())
        .expect("same variant"));

    handle.request_graceful_stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn missing_binary_is_a_start_error() {
    let command = CommandSpec::new("/nonexistent/rotenv-missing-binary", Vec::new());
    let result = ProcessHandle::start(&command, credential("A", "B"));
    match result {
        Err(StartError::Spawn { program, .. }) => {
            assert_eq!(program, "/nonexistent/rotenv-missing-binary");
        }
        Ok(_) => panic!("spawn should fail"),
    }
}

#[tokio::test]
async fn cooperative_child_exits_within_grace() {
    let command = CommandSpec::new("sleep", vec!["30".to_owned()]);
    let mut handle = ProcessHandle::start(&command, credential("A", "B")).expect("should start");

    let started = Instant::now();
    let outcome = handle.request_graceful_stop(Duration::from_secs(5)).await;

    // sleep dies from SIGTERM: 128 + 15.
    assert_eq!(outcome, StopOutcome::Exited(143));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn stubborn_child_is_killed_after_grace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ready = dir.path().join("ready");
    let script = r#"trap '' TERM; echo ready > "$1"; while :; do sleep 0.1; done"#;

    let mut handle = ProcessHandle::start(&sh(script, &ready), credential("A", "B"))
        .expect("should start");
    wait_for_file(&ready).await;

    let grace = Duration::from_millis(300);
    let started = Instant::now();
    let outcome = handle.request_graceful_stop(grace).await;

    assert!(outcome.was_forced());
    // SIGKILL: 128 + 9.
    assert_eq!(outcome.exit_code(), 137);
    assert!(started.elapsed() >= grace);
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn stopping_an_exited_child_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut handle =
        ProcessHandle::start(&sh("exit 0", dir.path()), credential("A", "B")).expect("should start");
    handle.wait_exit().await;

    let outcome = handle.request_graceful_stop(Duration::from_secs(5)).await;
    assert_eq!(outcome, StopOutcome::AlreadyExited(0));
}
