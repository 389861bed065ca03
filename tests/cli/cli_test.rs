//! CLI contract tests.

use std::time::Duration;

use assert_cmd::Command;

fn rotenv() -> Command {
    match Command::cargo_bin("rotenv") {
        Ok(cmd) => cmd,
        Err(err) => panic!("rotenv binary should be built: {err}"),
    }
}

#[test]
fn help_lists_arguments() {
    let output = rotenv().arg("--help").output().expect("run rotenv");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("LOGICAL_NAME"));
    assert!(stdout.contains("--type"));
    assert!(stdout.contains("--file"));
    assert!(stdout.contains("--interval"));
}

#[test]
fn missing_command_is_a_usage_error() {
    rotenv().arg("svc").assert().code(2);
}

#[test]
fn no_arguments_is_a_usage_error() {
    rotenv().assert().code(2);
}

#[test]
fn zero_interval_is_rejected() {
    let output = rotenv()
        .args(["-i", "0", "svc", "true"])
        .output()
        .expect("run rotenv");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("interval_secs"));
}

#[test]
fn unreadable_settings_file_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = rotenv()
        .arg("--settings")
        .arg(dir.path().join("absent.toml"))
        .args(["svc", "true"])
        .output()
        .expect("run rotenv");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.toml"));
}

#[test]
fn flags_override_settings_file_before_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = dir.path().join("rotenv.toml");
    std::fs::write(&settings, "[supervisor]\ninterval_secs = 0\n").expect("write settings");

    // Supervision of a missing document keeps polling until the timeout.
    let output = rotenv()
        .arg("--settings")
        .arg(&settings)
        .args(["-i", "5", "-f"])
        .arg(dir.path().join("absent.json"))
        .args(["svc", "true"])
        .timeout(Duration::from_secs(2))
        .output()
        .expect("run rotenv");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("interval_secs"), "unexpected failure: {stderr}");
    assert_eq!(output.status.code(), None, "rotenv should still be running");
}

#[cfg(unix)]
#[test]
fn child_receives_resolved_credential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let document = dir.path().join("sec-config.json");
    let out = dir.path().join("child.out");
    std::fs::write(
        &document,
        r#"{"svc": [{"group": "g", "name": "k"}], "g": {"k": {"key": "A", "secret": "B"}}}"#,
    )
    .expect("write document");

    // The supervisor never exits on its own; the timeout ends the run.
    let _ = rotenv()
        .arg("-f")
        .arg(&document)
        .args(["-i", "1", "svc", "sh", "-c", r#"echo "$KEY:$SECRET" > "$0""#])
        .arg(&out)
        .timeout(Duration::from_secs(3))
        .output();

    let written = std::fs::read_to_string(&out).expect("child should have run");
    assert_eq!(written.trim(), "A:B");
}

#[cfg(unix)]
fn wait_for_pid(path: &std::path::Path) -> i32 {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {}", path.display());
}

#[cfg(unix)]
#[test]
fn sigterm_exits_with_signal_code_and_leaves_child_running() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let dir = tempfile::tempdir().expect("tempdir");
    let document = dir.path().join("sec-config.json");
    let pid_file = dir.path().join("child.pid");
    let log_dir = dir.path().join("logs");
    std::fs::write(
        &document,
        r#"{"svc": [{"group": "g", "name": "k"}], "g": {"k": {"key": "A", "secret": "B"}}}"#,
    )
    .expect("write document");

    let mut supervisor = std::process::Command::new(env!("CARGO_BIN_EXE_rotenv"))
        .arg("-f")
        .arg(&document)
        .arg("--log-dir")
        .arg(&log_dir)
        .args(["-i", "1", "svc", "sh", "-c", r#"echo $$ > "$0"; exec sleep 30"#])
        .arg(&pid_file)
        .spawn()
        .expect("spawn rotenv");
    let child = Pid::from_raw(wait_for_pid(&pid_file));

    let supervisor_pid = i32::try_from(supervisor.id()).expect("pid fits i32");
    kill(Pid::from_raw(supervisor_pid), Signal::SIGTERM).expect("signal rotenv");

    let mut status = None;
    for _ in 0..100 {
        status = supervisor.try_wait().expect("poll rotenv");
        if status.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let status = match status {
        Some(status) => status,
        None => {
            let _ = supervisor.kill();
            let _ = kill(child, Signal::SIGKILL);
            panic!("rotenv did not exit on SIGTERM");
        }
    };

    let child_alive = kill(child, None).is_ok();
    let _ = kill(child, Signal::SIGKILL);

    assert_eq!(status.code(), Some(143));
    assert!(child_alive, "the child must not be stopped by the supervisor");

    // The final log line is flushed to the JSON file before exit.
    let logged = std::fs::read_dir(&log_dir)
        .expect("log dir exists")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("rotenv.log"))
        .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
        .collect::<String>();
    assert!(logged.contains("termination signal received"));
}
